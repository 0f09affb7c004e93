use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use plate_relay::config::RelayConfig;
use plate_relay::CooldownScope;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PLATE_RELAY_CONFIG",
        "PLATE_RELAY_CAMERA",
        "PLATE_RELAY_RADIO",
        "PLATE_RELAY_RECOGNIZER",
        "PLATE_RELAY_COOLDOWN_SECS",
        "PLATE_RELAY_DEDUP_SCOPE",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RelayConfig::load().expect("load defaults");

    assert_eq!(cfg.camera.device, "stub://gate");
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (1280, 720, 30));
    assert_eq!(cfg.radio.device, "stub://radio");
    assert_eq!(cfg.radio.lora.frequency_mhz, 915.0);
    assert_eq!(cfg.radio.lora.spreading_factor, 7);
    assert_eq!(cfg.radio.lora.bandwidth_khz, 125.0);
    assert_eq!(cfg.radio.lora.coding_rate, 5);
    assert_eq!(cfg.radio.lora.preamble, 8);
    assert_eq!(cfg.radio.lora.sync_word, 0x12);
    assert!(cfg.radio.lora.crc);
    assert_eq!(cfg.radio.transmit.timeout, Duration::from_secs(5));
    assert_eq!(cfg.radio.transmit.poll_interval, Duration::from_millis(10));
    assert_eq!(cfg.recognizer.engine, "tesseract");
    assert_eq!(cfg.recognizer.settings.language, "eng");
    assert_eq!(cfg.pipeline.frame_queue_capacity, 10);
    assert_eq!(cfg.pipeline.working_width, 640);
    assert_eq!(cfg.dedup.capacity, 100);
    assert_eq!(cfg.dedup.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.dedup.scope, CooldownScope::Global);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "camera": { "device": "/dev/video2", "width": 640, "height": 480, "fps": 15 },
            "radio": { "device": "/dev/spidev0.1", "frequency_mhz": 868.0, "spreading_factor": 9 },
            "recognizer": { "engine": "stub://ABC-123DE", "language": "deu" },
            "pipeline": { "frame_queue_capacity": 4 },
            "dedup": { "capacity": 20, "scope": "per_plate" }
        }"#,
    );

    std::env::set_var("PLATE_RELAY_CONFIG", file.path());
    std::env::set_var("PLATE_RELAY_RADIO", "stub://bench");
    std::env::set_var("PLATE_RELAY_COOLDOWN_SECS", "30");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "/dev/video2");
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (640, 480, 15));
    assert_eq!(cfg.radio.device, "stub://bench");
    assert_eq!(cfg.radio.lora.frequency_mhz, 868.0);
    assert_eq!(cfg.radio.lora.spreading_factor, 9);
    assert_eq!(cfg.radio.lora.bandwidth_khz, 125.0);
    assert_eq!(cfg.recognizer.engine, "stub://ABC-123DE");
    assert_eq!(cfg.recognizer.settings.language, "deu");
    assert_eq!(cfg.pipeline.frame_queue_capacity, 4);
    assert_eq!(cfg.dedup.capacity, 20);
    assert_eq!(cfg.dedup.cooldown, Duration::from_secs(30));
    assert_eq!(cfg.dedup.scope, CooldownScope::PerPlate);

    clear_env();
}

#[test]
fn toml_extension_selects_toml_parser() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
[radio]
bandwidth_khz = 250.0
coding_rate = 8
tx_timeout_ms = 2000

[dedup]
cooldown_secs = 15
"#,
    );
    std::env::set_var("PLATE_RELAY_DEDUP_SCOPE", "per_plate");

    let cfg = RelayConfig::load_from(Some(file.path())).expect("load toml");

    assert_eq!(cfg.radio.lora.bandwidth_khz, 250.0);
    assert_eq!(cfg.radio.lora.coding_rate, 8);
    assert_eq!(cfg.radio.transmit.timeout, Duration::from_secs(2));
    assert_eq!(cfg.dedup.cooldown, Duration::from_secs(15));
    assert_eq!(cfg.dedup.scope, CooldownScope::PerPlate);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for contents in [
        r#"{ "radio": { "spreading_factor": 13 } }"#,
        r#"{ "radio": { "bandwidth_khz": 100.0 } }"#,
        r#"{ "radio": { "coding_rate": 9 } }"#,
        r#"{ "radio": { "frequency_mhz": 2400.0 } }"#,
        r#"{ "pipeline": { "frame_queue_capacity": 0 } }"#,
        r#"{ "dedup": { "scope": "sometimes" } }"#,
        r#"{ "unknown_section": {} }"#,
    ] {
        let file = write_config(".json", contents);
        assert!(
            RelayConfig::load_from(Some(file.path())).is_err(),
            "accepted {}",
            contents
        );
    }

    std::env::set_var("PLATE_RELAY_COOLDOWN_SECS", "ten");
    assert!(RelayConfig::load().is_err());
    std::env::set_var("PLATE_RELAY_COOLDOWN_SECS", "0");
    assert!(RelayConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PLATE_RELAY_CONFIG", "/nonexistent/plate_relay.json");
    assert!(RelayConfig::load().is_err());

    clear_env();
}
