use anyhow::Result;
use image::GrayImage;

use crate::recognize::backend::TextRecognizer;

/// Recognizer that answers the same text for every region.
#[derive(Clone, Debug)]
pub struct FixedRecognizer {
    text: String,
    calls: u64,
}

impl FixedRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl TextRecognizer for FixedRecognizer {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn recognize(&mut self, _region: &GrayImage) -> Result<String> {
        self.calls += 1;
        Ok(self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_recognizer_counts_calls() {
        let mut recognizer = FixedRecognizer::new("");
        let region = GrayImage::new(2, 2);
        assert_eq!(recognizer.recognize(&region).unwrap(), "");
        assert_eq!(recognizer.recognize(&region).unwrap(), "");
        assert_eq!(recognizer.calls(), 2);
    }
}
