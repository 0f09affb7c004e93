//! Relay orchestration.
//!
//! `Relay` owns everything the capture/control thread touches: the producer end
//! of the frame queue, the result channel, the deduplicator and the transmitter.
//! One `step` captures a frame, offers it to the worker without blocking, drains
//! every validated plate that is ready and sends the eligible ones synchronously.
//!
//! Shutdown order matters: the worker is stopped before the camera and radio are
//! released, so nothing writes to a torn-down transport.

use anyhow::{Context, Result};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use crate::dedup::Deduplicator;
use crate::extract::PlateCandidateExtractor;
use crate::frame::{frame_queue, Frame, FrameSender, Offer};
use crate::ingest::FrameSource;
use crate::pipeline::{FramePipeline, StopToken};
use crate::recognize::TextRecognizer;
use crate::transmit::{TransmissionOutcome, Transmitter};
use crate::ValidatedPlate;

const CAPTURE_RETRY: Duration = Duration::from_secs(1);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const WORKER_GRACE: Duration = Duration::from_secs(1);

/// Components a relay is assembled from.
pub struct RelayParts {
    pub extractor: PlateCandidateExtractor,
    pub recognizer: Box<dyn TextRecognizer>,
    pub dedup: Deduplicator,
    pub transmitter: Transmitter,
    pub frame_queue_capacity: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub capture_failures: u64,
    pub plates_detected: u64,
    pub plates_suppressed: u64,
    pub plates_sent: u64,
    pub sends_failed: u64,
    pub messages_received: u64,
}

pub struct Relay {
    frames: FrameSender,
    results: Receiver<ValidatedPlate>,
    pipeline: FramePipeline,
    dedup: Deduplicator,
    transmitter: Transmitter,
    stats: RelayStats,
    capture_retry: Duration,
    last_health_log: Instant,
    dropped_at_last_health: u64,
}

impl Relay {
    /// Warm up the recognizer, start the worker and put the radio in receive.
    ///
    /// On failure the radio is put to sleep and released before returning.
    pub fn start(parts: RelayParts) -> Result<Self> {
        let RelayParts {
            extractor,
            mut recognizer,
            dedup,
            mut transmitter,
            frame_queue_capacity,
        } = parts;

        if let Err(err) = recognizer.warm_up() {
            release_radio(transmitter);
            return Err(err.context(format!("recognizer {} warm-up", recognizer.name())));
        }

        let (frames, frame_rx) = frame_queue(frame_queue_capacity);
        let (result_tx, results) = mpsc::channel();
        let pipeline = match FramePipeline::spawn(frame_rx, result_tx, extractor, recognizer)
            .context("spawn pipeline worker")
        {
            Ok(pipeline) => pipeline,
            Err(err) => {
                release_radio(transmitter);
                return Err(err);
            }
        };

        if let Err(err) = transmitter.listen() {
            log::warn!("relay: receive path unavailable: {:#}", err);
        }

        log::info!(
            "relay started: frame queue {} frames, dedup {:?} cooldown {:?}",
            frames.capacity(),
            dedup.scope(),
            dedup.cooldown()
        );
        Ok(Self {
            frames,
            results,
            pipeline,
            dedup,
            transmitter,
            stats: RelayStats::default(),
            capture_retry: CAPTURE_RETRY,
            last_health_log: Instant::now(),
            dropped_at_last_health: 0,
        })
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Pause taken after a failed capture.
    pub fn set_capture_retry(&mut self, pause: Duration) {
        self.capture_retry = pause;
    }

    /// Offer a frame to the worker. Never blocks; a full queue drops the frame.
    pub fn submit(&mut self, frame: Frame) -> Offer {
        let offer = self.frames.offer(frame);
        if offer == Offer::Dropped {
            self.stats.frames_dropped += 1;
        }
        offer
    }

    /// Handle every plate the worker has produced so far, in arrival order.
    pub fn drain_results(&mut self) -> usize {
        let plates: Vec<ValidatedPlate> = self.results.try_iter().collect();
        let count = plates.len();
        for plate in plates {
            self.handle_plate(plate, Instant::now());
        }
        count
    }

    /// Dedup decision and, if eligible, a blocking send.
    ///
    /// The plate is recorded only when the send succeeds, so a failed send leaves
    /// it eligible for the next sighting.
    pub fn handle_plate(
        &mut self,
        plate: ValidatedPlate,
        now: Instant,
    ) -> Option<TransmissionOutcome> {
        self.stats.plates_detected += 1;
        if !self.dedup.should_send(&plate, now) {
            self.stats.plates_suppressed += 1;
            log::debug!("plate {} suppressed by cooldown", plate);
            return None;
        }

        log::info!("plate detected: {}", plate);
        let outcome = self.transmitter.send_plate(&plate);
        match outcome {
            TransmissionOutcome::Success => {
                self.dedup.record_sent(&plate, now);
                self.stats.plates_sent += 1;
                log::info!("plate sent: {}", plate);
            }
            TransmissionOutcome::Timeout | TransmissionOutcome::TransportError => {
                self.stats.sends_failed += 1;
                log::warn!("plate {} not sent ({:?}); stays eligible", plate, outcome);
            }
        }
        Some(outcome)
    }

    /// One capture/control iteration.
    pub fn step(&mut self, source: &mut dyn FrameSource) {
        match source.next_frame() {
            Ok(frame) => {
                self.stats.frames_captured += 1;
                self.submit(frame);
            }
            Err(err) => {
                self.stats.capture_failures += 1;
                log::warn!(
                    "capture failed: {:#}; retrying in {:?}",
                    err,
                    self.capture_retry
                );
                std::thread::sleep(self.capture_retry);
                return;
            }
        }

        self.drain_results();

        while self.transmitter.poll_incoming().is_some() {
            self.stats.messages_received += 1;
        }

        if self.last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            self.log_health(source);
        }
    }

    /// Periodic health line. Frames dropped since the previous line are
    /// reported once at warn. Returns that count.
    fn log_health(&mut self, source: &dyn FrameSource) -> u64 {
        let dropped = self.stats.frames_dropped - self.dropped_at_last_health;
        self.dropped_at_last_health = self.stats.frames_dropped;
        if dropped > 0 {
            log::warn!(
                "frame queue full: dropped {} frames since last health check",
                dropped
            );
        }

        let source_stats = source.stats();
        log::info!(
            "relay health={} worker={} frames={} dropped={} sent={} failed={} device={}",
            source.is_healthy(),
            self.pipeline.is_running(),
            source_stats.frames_captured,
            self.stats.frames_dropped,
            self.stats.plates_sent,
            self.stats.sends_failed,
            source_stats.device
        );
        self.last_health_log = Instant::now();
        dropped
    }

    /// Step until `quit` is cancelled or `max_iterations` steps have run.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        quit: &StopToken,
        max_iterations: Option<u64>,
    ) -> u64 {
        let mut iterations = 0u64;
        while !quit.is_cancelled() {
            if max_iterations.is_some_and(|max| iterations >= max) {
                break;
            }
            self.step(source);
            iterations += 1;
        }
        iterations
    }

    /// Stop the worker, then release the camera, then sleep and release the radio.
    pub fn shutdown(self, source: &mut dyn FrameSource) -> Result<RelayStats> {
        log::info!("relay shutting down");
        let Relay {
            frames,
            pipeline,
            transmitter,
            stats,
            ..
        } = self;

        drop(frames);
        match pipeline.stop(WORKER_GRACE) {
            Ok(Some(worker)) => log::info!(
                "pipeline worker joined: {} frames, {} plates, {} faults",
                worker.frames_processed,
                worker.plates,
                worker.faults
            ),
            Ok(None) => {}
            Err(err) => log::error!("pipeline worker: {:#}", err),
        }

        source.release();
        let radio = transmitter.shutdown();
        log::info!("radio link closed");
        radio?;
        Ok(stats)
    }
}

fn release_radio(transmitter: Transmitter) {
    if let Err(err) = transmitter.shutdown() {
        log::warn!("radio teardown failed: {:#}", err);
    }
}
