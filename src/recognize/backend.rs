use anyhow::Result;
use image::GrayImage;

/// Characters a plate can contain. Engines are restricted to this set.
pub const PLATE_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-";

/// Fixed engine configuration; not tunable at runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognizerSettings {
    /// Recognition model / language pack.
    pub language: String,
    /// Page segmentation mode. 7 = treat the image as a single text line.
    pub page_segmentation: u8,
    /// Engine mode. 3 = engine default.
    pub engine_mode: u8,
    pub whitelist: &'static str,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            page_segmentation: 7,
            engine_mode: 3,
            whitelist: PLATE_CHARSET,
        }
    }
}

/// Text recognizer trait.
///
/// Implementations run on the pipeline worker thread. The region image is borrowed
/// for the duration of the call only.
pub trait TextRecognizer: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Read the text in a binarized plate region. Empty output is not an error.
    fn recognize(&mut self, region: &GrayImage) -> Result<String>;

    /// Optional start-up check, run once before the worker starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
