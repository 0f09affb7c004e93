use anyhow::{anyhow, Context, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::recognize::backend::{RecognizerSettings, TextRecognizer};

/// Tesseract CLI backend.
///
/// Each region is PNG-encoded in memory and piped through
/// `tesseract stdin stdout`; nothing touches disk.
pub struct TesseractRecognizer {
    binary: PathBuf,
    settings: RecognizerSettings,
}

impl TesseractRecognizer {
    pub fn new(binary: impl Into<PathBuf>, settings: RecognizerSettings) -> Self {
        Self {
            binary: binary.into(),
            settings,
        }
    }

    fn command_args(&self) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.settings.language.clone(),
            "--psm".to_string(),
            self.settings.page_segmentation.to_string(),
            "--oem".to_string(),
            self.settings.engine_mode.to_string(),
            "-c".to_string(),
            format!("tessedit_char_whitelist={}", self.settings.whitelist),
        ]
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&mut self, region: &GrayImage) -> Result<String> {
        let png = encode_png(region)?;

        let mut child = Command::new(&self.binary)
            .args(self.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", self.binary.display()))?;

        {
            let mut stdin = child.stdin.take().context("tesseract stdin unavailable")?;
            stdin.write_all(&png).context("write region to tesseract")?;
        }

        let output = child.wait_with_output().context("wait for tesseract")?;
        if !output.status.success() {
            return Err(anyhow!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Fails when the binary is missing or lacks the configured language.
    fn warm_up(&mut self) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .output()
            .with_context(|| format!("run {} --list-langs", self.binary.display()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} --list-langs exited with {}",
                self.binary.display(),
                output.status
            ));
        }
        // Older releases print the list on stderr.
        let listing = [output.stdout, output.stderr].concat();
        let listing = String::from_utf8_lossy(&listing);
        if !listing
            .lines()
            .any(|line| line.trim() == self.settings.language)
        {
            return Err(anyhow!(
                "tesseract language '{}' is not installed",
                self.settings.language
            ));
        }
        Ok(())
    }
}

fn encode_png(region: &GrayImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            region.as_raw(),
            region.width(),
            region.height(),
            ExtendedColorType::L8,
        )
        .context("encode region as PNG")?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_pins_single_line_mode_and_whitelist() {
        let recognizer = TesseractRecognizer::new("tesseract", RecognizerSettings::default());
        assert_eq!(
            recognizer.command_args(),
            vec![
                "stdin",
                "stdout",
                "-l",
                "eng",
                "--psm",
                "7",
                "--oem",
                "3",
                "-c",
                "tessedit_char_whitelist=ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-",
            ]
        );
    }

    #[test]
    fn region_encodes_as_png() -> Result<()> {
        let png = encode_png(&GrayImage::new(8, 4))?;
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        Ok(())
    }

    #[test]
    fn missing_binary_fails_warm_up_and_recognition() {
        let mut recognizer = TesseractRecognizer::new(
            "/nonexistent/tesseract-binary",
            RecognizerSettings::default(),
        );
        assert!(recognizer.warm_up().is_err());
        assert!(recognizer.recognize(&GrayImage::new(4, 4)).is_err());
    }
}
