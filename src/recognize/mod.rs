//! Text recognition for plate regions.
//!
//! The recognizer is an external collaborator: it receives a binarized region and
//! returns best-effort text, possibly empty or garbage. No confidence is consumed;
//! every string goes to the plate validator.

mod backend;
mod backends;

use anyhow::Result;

pub use backend::{RecognizerSettings, TextRecognizer, PLATE_CHARSET};
pub use backends::{FixedRecognizer, TesseractRecognizer};

/// Build the recognizer named by `engine`.
///
/// `"tesseract"` runs the Tesseract CLI found at `binary`; `"stub://<TEXT>"` always
/// answers `<TEXT>` (bench runs and tests).
pub fn recognizer_from_engine(
    engine: &str,
    binary: &str,
    settings: RecognizerSettings,
) -> Result<Box<dyn TextRecognizer>> {
    if let Some(text) = engine.strip_prefix("stub://") {
        return Ok(Box::new(FixedRecognizer::new(text)));
    }
    match engine {
        "tesseract" => Ok(Box::new(TesseractRecognizer::new(binary, settings))),
        other => Err(anyhow::anyhow!("unknown recognizer engine '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    #[test]
    fn stub_engine_answers_fixed_text() -> Result<()> {
        let mut recognizer =
            recognizer_from_engine("stub://XYZ-789AB", "unused", RecognizerSettings::default())?;
        assert_eq!(recognizer.name(), "fixed");
        assert_eq!(recognizer.recognize(&GrayImage::new(4, 4))?, "XYZ-789AB");
        Ok(())
    }

    #[test]
    fn unknown_engine_is_rejected() {
        assert!(recognizer_from_engine("easyocr", "x", RecognizerSettings::default()).is_err());
    }
}
