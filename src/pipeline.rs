//! Frame pipeline worker.
//!
//! One worker thread pulls frames from the bounded frame queue and runs
//! extraction, recognition and validation on each. Validated plates go out on an
//! unbounded result channel that the capture loop drains.
//!
//! Cancellation is cooperative: the worker checks its `StopToken` once per loop
//! iteration and never interrupts a frame already in progress.

use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::extract::PlateCandidateExtractor;
use crate::frame::{Frame, FrameReceiver, Recv};
use crate::recognize::TextRecognizer;
use crate::{validate_plate, ValidatedPlate};

/// How long the worker waits on an empty queue before re-checking its token.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters kept by the worker and returned when it is joined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames_processed: u64,
    pub plates: u64,
    pub faults: u64,
}

/// Handle to the running worker.
pub struct FramePipeline {
    stop: StopToken,
    join: Option<JoinHandle<WorkerStats>>,
}

impl FramePipeline {
    /// Start the worker thread.
    pub fn spawn(
        frames: FrameReceiver,
        results: Sender<ValidatedPlate>,
        extractor: PlateCandidateExtractor,
        mut recognizer: Box<dyn TextRecognizer>,
    ) -> Result<Self> {
        let stop = StopToken::new();
        let worker_stop = stop.clone();
        let join = std::thread::Builder::new()
            .name("plate-worker".to_string())
            .spawn(move || {
                run_worker(
                    &frames,
                    &results,
                    &extractor,
                    recognizer.as_mut(),
                    &worker_stop,
                )
            })?;
        Ok(Self {
            stop,
            join: Some(join),
        })
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Ask the worker to stop and wait up to `grace` for it to exit.
    ///
    /// A worker still busy after `grace` is detached; it exits at its next check.
    pub fn stop(mut self, grace: Duration) -> Result<Option<WorkerStats>> {
        self.stop.cancel();
        let Some(join) = self.join.take() else {
            return Ok(None);
        };

        let deadline = Instant::now() + grace;
        while !join.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        if !join.is_finished() {
            log::warn!(
                "pipeline worker still busy after {:?}; detaching",
                grace
            );
            return Ok(None);
        }
        join.join()
            .map(Some)
            .map_err(|_| anyhow!("pipeline worker panicked"))
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Run one frame through extraction, recognition and validation.
///
/// `None` covers every silent outcome: no candidate, recognizer failure,
/// text rejected by the grammar.
pub fn process_frame(
    frame: &Frame,
    extractor: &PlateCandidateExtractor,
    recognizer: &mut dyn TextRecognizer,
) -> Option<ValidatedPlate> {
    let region = extractor.extract(frame)?;
    let text = match recognizer.recognize(&region.image) {
        Ok(text) => text,
        Err(err) => {
            log::debug!(
                "recognizer {} failed on frame {}: {:#}",
                recognizer.name(),
                frame.sequence(),
                err
            );
            return None;
        }
    };
    let plate = validate_plate(&text);
    if plate.is_none() {
        log::trace!("frame {}: rejected text {:?}", frame.sequence(), text);
    }
    plate
}

fn run_worker(
    frames: &FrameReceiver,
    results: &Sender<ValidatedPlate>,
    extractor: &PlateCandidateExtractor,
    recognizer: &mut dyn TextRecognizer,
    stop: &StopToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    log::info!("pipeline worker started (recognizer={})", recognizer.name());

    while !stop.is_cancelled() {
        let frame = match frames.recv(IDLE_POLL) {
            Recv::Frame(frame) => frame,
            Recv::Idle => continue,
            Recv::Closed => break,
        };
        stats.frames_processed += 1;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            process_frame(&frame, extractor, &mut *recognizer)
        }));
        match outcome {
            Ok(Some(plate)) => {
                stats.plates += 1;
                log::debug!("frame {}: plate {}", frame.sequence(), plate);
                if results.send(plate).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(_) => {
                stats.faults += 1;
                log::error!(
                    "pipeline worker: frame {} panicked; continuing",
                    frame.sequence()
                );
            }
        }
    }

    log::info!(
        "pipeline worker stopped after {} frames ({} plates)",
        stats.frames_processed,
        stats.plates
    );
    stats
}
