pub mod fixed;
pub mod tesseract;

pub use fixed::FixedRecognizer;
pub use tesseract::TesseractRecognizer;
