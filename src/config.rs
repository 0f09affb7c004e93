use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::dedup::{CooldownScope, DEFAULT_COOLDOWN, DEFAULT_DEDUP_CAPACITY};
use crate::extract::DEFAULT_WORKING_WIDTH;
use crate::frame::FRAME_QUEUE_CAPACITY;
use crate::ingest::CameraConfig;
use crate::radio::LoraSettings;
use crate::recognize::RecognizerSettings;
use crate::transmit::TransmitterConfig;

pub const CONFIG_ENV: &str = "PLATE_RELAY_CONFIG";

const DEFAULT_CAMERA_DEVICE: &str = "stub://gate";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_RADIO_DEVICE: &str = "stub://radio";
const DEFAULT_TX_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_TX_POLL_MS: u64 = 10;
const DEFAULT_RECOGNIZER_ENGINE: &str = "tesseract";
const DEFAULT_RECOGNIZER_BINARY: &str = "tesseract";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    camera: Option<CameraConfigFile>,
    radio: Option<RadioConfigFile>,
    recognizer: Option<RecognizerConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    dedup: Option<DedupConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RadioConfigFile {
    device: Option<String>,
    frequency_mhz: Option<f64>,
    spreading_factor: Option<u8>,
    bandwidth_khz: Option<f64>,
    coding_rate: Option<u8>,
    preamble: Option<u16>,
    sync_word: Option<u8>,
    crc: Option<bool>,
    spi_speed_hz: Option<u32>,
    tx_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognizerConfigFile {
    engine: Option<String>,
    binary: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    frame_queue_capacity: Option<usize>,
    working_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupConfigFile {
    capacity: Option<usize>,
    cooldown_secs: Option<u64>,
    scope: Option<CooldownScope>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub camera: CameraConfig,
    pub radio: RadioSettings,
    pub recognizer: RecognizerConfig,
    pub pipeline: PipelineSettings,
    pub dedup: DedupSettings,
}

#[derive(Debug, Clone)]
pub struct RadioSettings {
    /// spidev node (e.g., "/dev/spidev0.0") or "stub://<name>".
    pub device: String,
    pub lora: LoraSettings,
    pub transmit: TransmitterConfig,
}

#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// "tesseract" or "stub://<TEXT>".
    pub engine: String,
    pub binary: String,
    pub settings: RecognizerSettings,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frame_queue_capacity: usize,
    pub working_width: u32,
}

#[derive(Debug, Clone)]
pub struct DedupSettings {
    pub capacity: usize,
    pub cooldown: Duration,
    pub scope: CooldownScope,
}

impl RelayConfig {
    /// Load from the file named by `PLATE_RELAY_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from `path` (JSON, or TOML for `.toml`), then apply environment
    /// overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            fps: camera_file.fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };

        let radio_file = file.radio.unwrap_or_default();
        let lora_defaults = LoraSettings::default();
        let radio = RadioSettings {
            device: radio_file
                .device
                .unwrap_or_else(|| DEFAULT_RADIO_DEVICE.to_string()),
            lora: LoraSettings {
                frequency_mhz: radio_file
                    .frequency_mhz
                    .unwrap_or(lora_defaults.frequency_mhz),
                spreading_factor: radio_file
                    .spreading_factor
                    .unwrap_or(lora_defaults.spreading_factor),
                bandwidth_khz: radio_file
                    .bandwidth_khz
                    .unwrap_or(lora_defaults.bandwidth_khz),
                coding_rate: radio_file.coding_rate.unwrap_or(lora_defaults.coding_rate),
                preamble: radio_file.preamble.unwrap_or(lora_defaults.preamble),
                sync_word: radio_file.sync_word.unwrap_or(lora_defaults.sync_word),
                crc: radio_file.crc.unwrap_or(lora_defaults.crc),
                spi_speed_hz: radio_file
                    .spi_speed_hz
                    .unwrap_or(lora_defaults.spi_speed_hz),
            },
            transmit: TransmitterConfig {
                timeout: Duration::from_millis(
                    radio_file.tx_timeout_ms.unwrap_or(DEFAULT_TX_TIMEOUT_MS),
                ),
                poll_interval: Duration::from_millis(
                    radio_file.poll_interval_ms.unwrap_or(DEFAULT_TX_POLL_MS),
                ),
            },
        };

        let recognizer_file = file.recognizer.unwrap_or_default();
        let mut settings = RecognizerSettings::default();
        if let Some(language) = recognizer_file.language {
            settings.language = language;
        }
        let recognizer = RecognizerConfig {
            engine: recognizer_file
                .engine
                .unwrap_or_else(|| DEFAULT_RECOGNIZER_ENGINE.to_string()),
            binary: recognizer_file
                .binary
                .unwrap_or_else(|| DEFAULT_RECOGNIZER_BINARY.to_string()),
            settings,
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            frame_queue_capacity: pipeline_file
                .frame_queue_capacity
                .unwrap_or(FRAME_QUEUE_CAPACITY),
            working_width: pipeline_file
                .working_width
                .unwrap_or(DEFAULT_WORKING_WIDTH),
        };

        let dedup_file = file.dedup.unwrap_or_default();
        let dedup = DedupSettings {
            capacity: dedup_file.capacity.unwrap_or(DEFAULT_DEDUP_CAPACITY),
            cooldown: dedup_file
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COOLDOWN),
            scope: dedup_file.scope.unwrap_or_default(),
        };

        Self {
            camera,
            radio,
            recognizer,
            pipeline,
            dedup,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("PLATE_RELAY_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(device) = std::env::var("PLATE_RELAY_RADIO") {
            if !device.trim().is_empty() {
                self.radio.device = device;
            }
        }
        if let Ok(engine) = std::env::var("PLATE_RELAY_RECOGNIZER") {
            if !engine.trim().is_empty() {
                self.recognizer.engine = engine;
            }
        }
        if let Ok(cooldown) = std::env::var("PLATE_RELAY_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("PLATE_RELAY_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.dedup.cooldown = Duration::from_secs(seconds);
        }
        if let Ok(scope) = std::env::var("PLATE_RELAY_DEDUP_SCOPE") {
            if !scope.trim().is_empty() {
                self.dedup.scope = scope.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        self.radio.lora.validate()?;
        if self.radio.transmit.timeout.is_zero() {
            return Err(anyhow!("radio tx_timeout_ms must be greater than zero"));
        }
        if self.radio.transmit.poll_interval.is_zero() {
            return Err(anyhow!("radio poll_interval_ms must be greater than zero"));
        }
        if self.recognizer.settings.language.trim().is_empty() {
            return Err(anyhow!("recognizer language must not be empty"));
        }
        if self.pipeline.frame_queue_capacity == 0 {
            return Err(anyhow!("pipeline frame_queue_capacity must be greater than zero"));
        }
        if self.pipeline.working_width == 0 {
            return Err(anyhow!("pipeline working_width must be greater than zero"));
        }
        if self.dedup.capacity == 0 {
            return Err(anyhow!("dedup capacity must be greater than zero"));
        }
        if self.dedup.cooldown.is_zero() {
            return Err(anyhow!("dedup cooldown must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
