//! plate_relayd - licence plate relay daemon
//!
//! This daemon:
//! 1. Opens the LoRa radio (fatal on failure)
//! 2. Opens the camera (fatal on failure; the radio is released first)
//! 3. Runs plate extraction and recognition on a worker thread
//! 4. Relays newly seen plates over the radio, suppressing repeats
//! 5. On Ctrl-C, stops the worker and then releases camera and radio

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use plate_relay::config::RelayConfig;
use plate_relay::radio::open_radio;
use plate_relay::recognize::recognizer_from_engine;
use plate_relay::{
    Camera, Deduplicator, FrameSource, PlateCandidateExtractor, Relay, RelayParts, StopToken,
    Transmitter,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay licence plates seen by a camera over LoRa")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "PLATE_RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many capture iterations (bench and smoke runs).
    #[arg(long)]
    max_iterations: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = RelayConfig::load_from(args.config.as_deref())?;

    let quit = StopToken::new();
    let handler_quit = quit.clone();
    ctrlc::set_handler(move || {
        handler_quit.cancel();
    })
    .context("install Ctrl-C handler")?;

    log::info!("setting up radio {}", cfg.radio.device);
    let radio = open_radio(&cfg.radio.device, &cfg.radio.lora)
        .with_context(|| format!("initialise radio {}", cfg.radio.device))?;
    let transmitter = Transmitter::new(radio, cfg.radio.transmit);

    log::info!("initialising camera {}", cfg.camera.device);
    let mut camera = match open_camera(&cfg) {
        Ok(camera) => camera,
        Err(err) => {
            teardown_radio(transmitter);
            return Err(err);
        }
    };

    let recognizer = match recognizer_from_engine(
        &cfg.recognizer.engine,
        &cfg.recognizer.binary,
        cfg.recognizer.settings.clone(),
    ) {
        Ok(recognizer) => recognizer,
        Err(err) => {
            camera.release();
            teardown_radio(transmitter);
            return Err(err);
        }
    };

    let parts = RelayParts {
        extractor: PlateCandidateExtractor::new(cfg.pipeline.working_width),
        recognizer,
        dedup: Deduplicator::new(cfg.dedup.capacity, cfg.dedup.cooldown, cfg.dedup.scope),
        transmitter,
        frame_queue_capacity: cfg.pipeline.frame_queue_capacity,
    };
    // Relay::start releases the radio itself when it fails.
    let mut relay = match Relay::start(parts) {
        Ok(relay) => relay,
        Err(err) => {
            camera.release();
            return Err(err);
        }
    };

    log::info!(
        "plate_relayd running: camera={} radio={} recognizer={}",
        cfg.camera.device,
        cfg.radio.device,
        cfg.recognizer.engine
    );
    let iterations = relay.run(&mut camera, &quit, args.max_iterations);
    if quit.is_cancelled() {
        log::info!("script terminated by user");
    }

    let stats = relay.shutdown(&mut camera)?;
    log::info!(
        "plate_relayd stopped after {} iterations: frames={} dropped={} sent={} failed={}",
        iterations,
        stats.frames_captured,
        stats.frames_dropped,
        stats.plates_sent,
        stats.sends_failed
    );
    Ok(())
}

fn open_camera(cfg: &RelayConfig) -> Result<Camera> {
    let mut camera = Camera::new(cfg.camera.clone())?;
    camera
        .connect()
        .with_context(|| format!("open camera {}", cfg.camera.device))?;
    Ok(camera)
}

fn teardown_radio(transmitter: Transmitter) {
    if let Err(err) = transmitter.shutdown() {
        log::warn!("radio teardown failed: {:#}", err);
    }
}
