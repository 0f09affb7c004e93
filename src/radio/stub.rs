use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{RadioMode, RadioTransport};

/// When a stub transmission reports completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubCompletion {
    /// `tx_done` rises once this much time has passed since entering transmit mode.
    After(Duration),
    /// The completion flag never rises.
    Never,
    /// Every payload write fails as if the bus were gone.
    Fault,
}

#[derive(Debug)]
struct StubState {
    completion: StubCompletion,
    mode: RadioMode,
    staged: Vec<u8>,
    tx_started: Option<Instant>,
    tx_done: bool,
    writes: usize,
    transmitted: Vec<Vec<u8>>,
    inbox: VecDeque<Vec<u8>>,
    released: bool,
}

/// In-memory radio.
///
/// Inspect or script it through a `StubHandle`, which stays valid after the
/// radio is boxed and moved into a transmitter.
pub struct StubRadio {
    state: Arc<Mutex<StubState>>,
}

/// Shared view of a `StubRadio`.
#[derive(Clone)]
pub struct StubHandle {
    state: Arc<Mutex<StubState>>,
}

fn lock(state: &Mutex<StubState>) -> MutexGuard<'_, StubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StubRadio {
    pub fn new(completion: StubCompletion) -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                completion,
                mode: RadioMode::Standby,
                staged: Vec::new(),
                tx_started: None,
                tx_done: false,
                writes: 0,
                transmitted: Vec::new(),
                inbox: VecDeque::new(),
                released: false,
            })),
        }
    }

    pub fn handle(&self) -> StubHandle {
        StubHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn ensure_live(state: &StubState) -> Result<()> {
        if state.released {
            return Err(anyhow!("stub radio used after release"));
        }
        Ok(())
    }
}

impl RadioTransport for StubRadio {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<()> {
        let mut state = lock(&self.state);
        Self::ensure_live(&state)?;
        if mode == RadioMode::Transmit {
            state.tx_started = Some(Instant::now());
        }
        state.mode = mode;
        Ok(())
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        Self::ensure_live(&state)?;
        if state.completion == StubCompletion::Fault {
            return Err(anyhow!("stub radio bus fault"));
        }
        state.writes += 1;
        state.staged = payload.to_vec();
        Ok(())
    }

    fn tx_done(&mut self) -> Result<bool> {
        let mut state = lock(&self.state);
        Self::ensure_live(&state)?;
        if state.tx_done {
            return Ok(true);
        }
        let (StubCompletion::After(delay), Some(started)) = (state.completion, state.tx_started)
        else {
            return Ok(false);
        };
        if state.mode == RadioMode::Transmit && started.elapsed() >= delay {
            let packet = std::mem::take(&mut state.staged);
            state.transmitted.push(packet);
            state.tx_done = true;
            state.tx_started = None;
            // Hardware drops back to standby once the packet is out.
            state.mode = RadioMode::Standby;
        }
        Ok(state.tx_done)
    }

    fn clear_tx_done(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        Self::ensure_live(&state)?;
        state.tx_done = false;
        Ok(())
    }

    fn take_received(&mut self) -> Result<Option<Vec<u8>>> {
        let mut state = lock(&self.state);
        Self::ensure_live(&state)?;
        if state.mode != RadioMode::ReceiveContinuous {
            return Ok(None);
        }
        Ok(state.inbox.pop_front())
    }

    fn release(&mut self) -> Result<()> {
        lock(&self.state).released = true;
        Ok(())
    }
}

impl StubHandle {
    /// Number of payload writes, completed or not.
    pub fn writes(&self) -> usize {
        lock(&self.state).writes
    }

    /// Payloads that completed transmission, oldest first.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        lock(&self.state).transmitted.clone()
    }

    pub fn mode(&self) -> RadioMode {
        lock(&self.state).mode
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }

    pub fn set_completion(&self, completion: StubCompletion) {
        lock(&self.state).completion = completion;
    }

    /// Queue a packet for the receive path.
    pub fn inject_received(&self, packet: impl Into<Vec<u8>>) {
        lock(&self.state).inbox.push_back(packet.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_scripted_delay() -> Result<()> {
        let mut radio = StubRadio::new(StubCompletion::After(Duration::from_millis(30)));
        let handle = radio.handle();

        radio.write_payload(b"ABC-123DE")?;
        radio.set_mode(RadioMode::Transmit)?;
        assert!(!radio.tx_done()?);

        std::thread::sleep(Duration::from_millis(40));
        assert!(radio.tx_done()?);
        radio.clear_tx_done()?;
        assert!(!radio.tx_done()?);

        assert_eq!(handle.transmitted(), vec![b"ABC-123DE".to_vec()]);
        assert_eq!(handle.mode(), RadioMode::Standby);
        Ok(())
    }

    #[test]
    fn received_packets_only_surface_in_receive_mode() -> Result<()> {
        let mut radio = StubRadio::new(StubCompletion::Never);
        radio.handle().inject_received(b"ping".to_vec());

        assert_eq!(radio.take_received()?, None);
        radio.set_mode(RadioMode::ReceiveContinuous)?;
        assert_eq!(radio.take_received()?, Some(b"ping".to_vec()));
        assert_eq!(radio.take_received()?, None);
        Ok(())
    }

    #[test]
    fn released_radio_rejects_use() -> Result<()> {
        let mut radio = StubRadio::new(StubCompletion::Never);
        radio.release()?;
        assert!(radio.handle().is_released());
        assert!(radio.set_mode(RadioMode::Standby).is_err());
        Ok(())
    }
}
