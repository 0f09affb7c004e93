//! Plate Relay
//!
//! This crate implements an unattended roadside/gate node that reads licence plates
//! from a live camera feed and relays newly seen plates over a LoRa radio link.
//!
//! # Architecture
//!
//! Data flows one way, from the camera to the radio:
//!
//! 1. **Ingest**: a `FrameSource` delivers owned `Frame`s to the capture loop.
//! 2. **Pipeline**: frames cross a bounded, lossy queue to a single worker thread.
//! 3. **Extract**: the worker locates at most one quadrilateral plate candidate.
//! 4. **Recognize**: an external OCR engine turns the candidate into raw text.
//! 5. **Validate**: `validate_plate` is the only way to obtain a `ValidatedPlate`.
//! 6. **Relay**: the capture loop drains results, consults the `Deduplicator`
//!    and drives the `Transmitter` synchronously.
//!
//! # Module Structure
//!
//! - `frame`: owned frames and the bounded frame queue
//! - `ingest`: camera sources (V4L2, synthetic `stub://` scenes)
//! - `extract`: contour-based plate candidate extraction
//! - `recognize`: OCR engine trait and backends
//! - `pipeline`: worker thread and cooperative stop token
//! - `dedup`: time-windowed resend suppression
//! - `radio`: LoRa transport trait, SX127x driver, stub radio
//! - `transmit`: send-with-timeout state machine
//! - `relay`: run loop and shutdown ordering
//! - `config`: file + environment configuration

use std::fmt;
use std::sync::OnceLock;

pub mod config;
pub mod dedup;
pub mod extract;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod radio;
pub mod recognize;
pub mod relay;
pub mod transmit;

pub use dedup::{CooldownScope, Deduplicator, SentRecord};
pub use extract::{PlateCandidateExtractor, PlateRegion, Quad};
pub use frame::{frame_queue, Frame, FrameReceiver, FrameSender, Offer, Recv};
pub use ingest::{Camera, CameraConfig, FrameSource, SourceStats};
pub use pipeline::{FramePipeline, StopToken};
pub use radio::{LoraSettings, RadioMode, RadioTransport, StubCompletion, StubRadio};
pub use recognize::{RecognizerSettings, TextRecognizer};
pub use relay::{Relay, RelayParts, RelayStats};
pub use transmit::{TransmissionOutcome, Transmitter, TransmitterConfig, TransmitterState};

// -------------------- Plate Grammar --------------------

/// Accepted plate layout: three letters, hyphen, three digits, two letters (`LLL-DDDLL`).
pub const PLATE_PATTERN: &str = r"^[A-Z]{3}-[0-9]{3}[A-Z]{2}$";

/// A plate string that matched [`PLATE_PATTERN`].
///
/// The inner string is private, so the only constructor is [`validate_plate`]:
///
/// ```compile_fail
/// let plate = plate_relay::ValidatedPlate(String::from("ABC-123DE"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidatedPlate(String);

impl ValidatedPlate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTF-8 bytes as they go on air.
    pub fn payload(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedPlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedPlate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate recognizer output against the plate grammar.
///
/// Only leading and trailing whitespace is removed. Near-misses are rejected,
/// never corrected: `"abc-123de"`, `"AB-123DE"` and `""` all yield `None`.
pub fn validate_plate(raw: &str) -> Option<ValidatedPlate> {
    static PLATE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = PLATE_RE.get_or_init(|| regex::Regex::new(PLATE_PATTERN).unwrap());

    let cleaned = raw.trim();
    if re.is_match(cleaned) {
        Some(ValidatedPlate(cleaned.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_grammar() {
        let plate = validate_plate("ABC-123DE").expect("valid plate");
        assert_eq!(plate.as_str(), "ABC-123DE");
        assert_eq!(plate.payload(), b"ABC-123DE");
    }

    #[test]
    fn trims_surrounding_whitespace_only() {
        assert_eq!(
            validate_plate("ABC-123DE ").map(ValidatedPlate::into_string),
            Some("ABC-123DE".to_string())
        );
        // OCR engines terminate lines with a newline and form feed.
        assert!(validate_plate("  XYZ-789AB\n\x0c").is_some());
        assert!(validate_plate("ABC -123DE").is_none());
        assert!(validate_plate("ABC-12 3DE").is_none());
    }

    #[test]
    fn rejects_case_and_length_mismatches() {
        assert!(validate_plate("abc-123de").is_none());
        assert!(validate_plate("AB-123DE").is_none());
        assert!(validate_plate("ABCD-123DE").is_none());
        assert!(validate_plate("ABC-1234DE").is_none());
        assert!(validate_plate("ABC-123D").is_none());
        assert!(validate_plate("ABC123DE").is_none());
        assert!(validate_plate("").is_none());
        assert!(validate_plate("   ").is_none());
    }

    #[test]
    fn rejects_substring_matches() {
        assert!(validate_plate("XABC-123DE").is_none());
        assert!(validate_plate("ABC-123DEX").is_none());
        assert!(validate_plate("plate ABC-123DE").is_none());
    }

    #[test]
    fn rejects_non_ascii_digits() {
        // Arabic-Indic digits are `\d` in Unicode regexes; the grammar is ASCII only.
        assert!(validate_plate("ABC-\u{0661}\u{0662}\u{0663}DE").is_none());
    }
}
