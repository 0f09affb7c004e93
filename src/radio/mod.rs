//! Radio transport layer.
//!
//! `RadioTransport` is the seam between the transmitter state machine and the
//! hardware. Two implementations ship:
//! - `Sx127x`: register-level LoRa driver over an `SpiBus` (Linux spidev with
//!   feature `radio-sx127x`)
//! - `StubRadio`: in-memory radio with scripted completion, used by tests and
//!   `stub://` deployments

pub mod stub;
pub mod sx127x;

#[cfg(all(target_os = "linux", feature = "radio-sx127x"))]
pub mod spidev;

use anyhow::{anyhow, Result};
use std::time::Duration;

pub use stub::{StubCompletion, StubHandle, StubRadio};
pub use sx127x::{SpiBus, Sx127x};

/// Supported LoRa bandwidths in kHz, indexed by their register code.
pub const SUPPORTED_BANDWIDTHS_KHZ: [f64; 10] =
    [7.8, 10.4, 15.6, 20.8, 31.25, 41.7, 62.5, 125.0, 250.0, 500.0];

/// Operating modes the relay drives the radio through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioMode {
    Sleep,
    Standby,
    Transmit,
    ReceiveContinuous,
}

/// Physical-layer settings applied once at radio init.
#[derive(Clone, Debug, PartialEq)]
pub struct LoraSettings {
    pub frequency_mhz: f64,
    pub spreading_factor: u8,
    pub bandwidth_khz: f64,
    /// Denominator of the 4/x coding rate (5..=8).
    pub coding_rate: u8,
    pub preamble: u16,
    pub sync_word: u8,
    pub crc: bool,
    /// SPI clock for hardware buses.
    pub spi_speed_hz: u32,
}

impl Default for LoraSettings {
    fn default() -> Self {
        Self {
            frequency_mhz: 915.0,
            spreading_factor: 7,
            bandwidth_khz: 125.0,
            coding_rate: 5,
            preamble: 8,
            sync_word: 0x12,
            crc: true,
            spi_speed_hz: 5_000_000,
        }
    }
}

impl LoraSettings {
    pub fn validate(&self) -> Result<()> {
        if !(137.0..=1020.0).contains(&self.frequency_mhz) {
            return Err(anyhow!(
                "radio frequency {} MHz outside 137-1020 MHz",
                self.frequency_mhz
            ));
        }
        if !(6..=12).contains(&self.spreading_factor) {
            return Err(anyhow!(
                "spreading factor {} outside 6..=12",
                self.spreading_factor
            ));
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(anyhow!(
                "coding rate 4/{} outside 4/5..=4/8",
                self.coding_rate
            ));
        }
        self.bandwidth_code()?;
        if self.preamble == 0 {
            return Err(anyhow!("preamble length must be > 0"));
        }
        if self.spi_speed_hz == 0 {
            return Err(anyhow!("spi speed must be > 0"));
        }
        Ok(())
    }

    /// Register code for the configured bandwidth.
    pub fn bandwidth_code(&self) -> Result<u8> {
        SUPPORTED_BANDWIDTHS_KHZ
            .iter()
            .position(|bw| (bw - self.bandwidth_khz).abs() < 0.05)
            .map(|code| code as u8)
            .ok_or_else(|| anyhow!("unsupported LoRa bandwidth {} kHz", self.bandwidth_khz))
    }
}

/// Half-duplex radio as seen by the transmitter.
pub trait RadioTransport: Send {
    fn name(&self) -> &'static str;

    fn set_mode(&mut self, mode: RadioMode) -> Result<()>;

    /// Load `payload` into the transmit buffer. Does not start transmission.
    fn write_payload(&mut self, payload: &[u8]) -> Result<()>;

    /// Whether the transmit-complete flag is raised.
    fn tx_done(&mut self) -> Result<bool>;

    fn clear_tx_done(&mut self) -> Result<()>;

    /// Pop a received packet if one arrived since the last call.
    fn take_received(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Release the underlying bus. The radio must not be used afterwards.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open the radio named by `device`.
///
/// `stub://...` yields a `StubRadio` that completes every send after a short
/// delay; anything else is treated as a spidev node.
pub fn open_radio(device: &str, settings: &LoraSettings) -> Result<Box<dyn RadioTransport>> {
    settings.validate()?;
    if device.starts_with("stub://") {
        log::info!("radio: using stub transport {}", device);
        return Ok(Box::new(StubRadio::new(StubCompletion::After(
            Duration::from_millis(20),
        ))));
    }
    open_hardware(device, settings)
}

#[cfg(all(target_os = "linux", feature = "radio-sx127x"))]
fn open_hardware(device: &str, settings: &LoraSettings) -> Result<Box<dyn RadioTransport>> {
    use anyhow::Context;

    let bus = spidev::Spidev::open(device, settings.spi_speed_hz)?;
    let radio = Sx127x::init(bus, settings.clone())
        .with_context(|| format!("initialise SX127x on {}", device))?;
    log::info!(
        "radio: SX127x on {} at {} MHz SF{} BW{} kHz",
        device,
        settings.frequency_mhz,
        settings.spreading_factor,
        settings.bandwidth_khz
    );
    Ok(Box::new(radio))
}

#[cfg(not(all(target_os = "linux", feature = "radio-sx127x")))]
fn open_hardware(device: &str, _settings: &LoraSettings) -> Result<Box<dyn RadioTransport>> {
    Err(anyhow!(
        "radio device {} requires the radio-sx127x feature on Linux",
        device
    ))
}
