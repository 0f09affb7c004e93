//! Transmitter state machine.
//!
//! `Idle -> Sending -> Idle`. A send loads the payload, switches the radio to
//! transmit and polls the completion flag until the deadline. There is no retry:
//! a plate whose send fails is simply not recorded and stays eligible.
//!
//! When listening is enabled the radio is parked in continuous receive between
//! sends, and `poll_incoming` surfaces whatever arrived.

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::radio::{RadioMode, RadioTransport};
use crate::ValidatedPlate;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmissionOutcome {
    Success,
    Timeout,
    TransportError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmitterState {
    Idle,
    Sending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransmitterConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }
}

pub struct Transmitter {
    radio: Box<dyn RadioTransport>,
    config: TransmitterConfig,
    state: TransmitterState,
    listening: bool,
}

impl Transmitter {
    pub fn new(radio: Box<dyn RadioTransport>, config: TransmitterConfig) -> Self {
        Self {
            radio,
            config,
            state: TransmitterState::Idle,
            listening: false,
        }
    }

    pub fn state(&self) -> TransmitterState {
        self.state
    }

    pub fn send_plate(&mut self, plate: &ValidatedPlate) -> TransmissionOutcome {
        self.send(plate.payload())
    }

    /// Blocking send of one payload. Always returns in `Idle`.
    pub fn send(&mut self, payload: &[u8]) -> TransmissionOutcome {
        if payload.is_empty() {
            log::warn!("transmitter: refusing to send empty payload");
            return TransmissionOutcome::TransportError;
        }

        self.state = TransmitterState::Sending;
        let outcome = match self.transmit(payload) {
            Ok(TransmissionOutcome::Timeout) => {
                log::error!(
                    "transmitter: no completion within {:?}",
                    self.config.timeout
                );
                if let Err(err) = self.radio.set_mode(RadioMode::Standby) {
                    log::warn!("transmitter: standby after timeout failed: {:#}", err);
                }
                TransmissionOutcome::Timeout
            }
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("transmitter: {} transport error: {:#}", self.radio.name(), err);
                TransmissionOutcome::TransportError
            }
        };
        self.state = TransmitterState::Idle;

        if self.listening {
            self.rearm_receive();
        }
        outcome
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<TransmissionOutcome> {
        self.radio.write_payload(payload)?;
        self.radio.set_mode(RadioMode::Transmit)?;

        let deadline = Instant::now() + self.config.timeout;
        loop {
            if self.radio.tx_done()? {
                self.radio.clear_tx_done()?;
                return Ok(TransmissionOutcome::Success);
            }
            if Instant::now() >= deadline {
                return Ok(TransmissionOutcome::Timeout);
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Park the radio in continuous receive between sends.
    pub fn listen(&mut self) -> Result<()> {
        self.radio.set_mode(RadioMode::ReceiveContinuous)?;
        self.listening = true;
        Ok(())
    }

    fn rearm_receive(&mut self) {
        if let Err(err) = self.radio.set_mode(RadioMode::ReceiveContinuous) {
            log::warn!("transmitter: failed to re-enter receive: {:#}", err);
        }
    }

    /// Return one received message, decoded lossily.
    ///
    /// Receive failures are logged and otherwise ignored.
    pub fn poll_incoming(&mut self) -> Option<String> {
        if !self.listening {
            return None;
        }
        match self.radio.take_received() {
            Ok(Some(packet)) => {
                let message = String::from_utf8_lossy(&packet).into_owned();
                log::info!("Received: {}", message);
                Some(message)
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("transmitter: receive failed: {:#}", err);
                None
            }
        }
    }

    /// Put the radio to sleep and release its bus. Both steps are attempted.
    pub fn shutdown(mut self) -> Result<()> {
        self.listening = false;
        let sleep = self.radio.set_mode(RadioMode::Sleep);
        if let Err(err) = &sleep {
            log::warn!("transmitter: failed to put radio to sleep: {:#}", err);
        }
        let release = self.radio.release();
        sleep.and(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{StubCompletion, StubRadio};

    fn transmitter(completion: StubCompletion) -> (Transmitter, crate::radio::StubHandle) {
        let radio = StubRadio::new(completion);
        let handle = radio.handle();
        (
            Transmitter::new(Box::new(radio), TransmitterConfig::default()),
            handle,
        )
    }

    #[test]
    fn empty_payload_is_transport_error_without_touching_radio() {
        let (mut tx, handle) = transmitter(StubCompletion::After(Duration::ZERO));
        assert_eq!(tx.send(b""), TransmissionOutcome::TransportError);
        assert_eq!(tx.state(), TransmitterState::Idle);
        assert_eq!(handle.writes(), 0);
    }

    #[test]
    fn completion_within_budget_is_success() {
        let (mut tx, handle) = transmitter(StubCompletion::After(Duration::from_secs(1)));
        let started = Instant::now();
        assert_eq!(tx.send(b"ABC-123DE"), TransmissionOutcome::Success);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
        assert_eq!(tx.state(), TransmitterState::Idle);
        assert_eq!(handle.transmitted(), vec![b"ABC-123DE".to_vec()]);
    }

    #[test]
    fn missing_completion_times_out_at_budget() {
        let (mut tx, handle) = transmitter(StubCompletion::Never);
        let started = Instant::now();
        assert_eq!(tx.send(b"ABC-123DE"), TransmissionOutcome::Timeout);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(5_500), "{:?}", elapsed);
        assert_eq!(tx.state(), TransmitterState::Idle);
        assert_eq!(handle.mode(), RadioMode::Standby);
        assert!(handle.transmitted().is_empty());
    }

    #[test]
    fn bus_fault_is_transport_error() {
        let (mut tx, _handle) = transmitter(StubCompletion::Fault);
        assert_eq!(tx.send(b"ABC-123DE"), TransmissionOutcome::TransportError);
        assert_eq!(tx.state(), TransmitterState::Idle);
    }

    #[test]
    fn listening_radio_returns_to_receive_after_send() -> Result<()> {
        let (mut tx, handle) = transmitter(StubCompletion::After(Duration::ZERO));
        tx.listen()?;
        assert_eq!(tx.send(b"ABC-123DE"), TransmissionOutcome::Success);
        assert_eq!(handle.mode(), RadioMode::ReceiveContinuous);

        handle.inject_received(b"ack \xFFABC".to_vec());
        assert_eq!(tx.poll_incoming().as_deref(), Some("ack \u{FFFD}ABC"));
        assert_eq!(tx.poll_incoming(), None);
        Ok(())
    }

    #[test]
    fn shutdown_sleeps_then_releases() -> Result<()> {
        let (tx, handle) = transmitter(StubCompletion::Never);
        tx.shutdown()?;
        assert_eq!(handle.mode(), RadioMode::Sleep);
        assert!(handle.is_released());
        Ok(())
    }
}
