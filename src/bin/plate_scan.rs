//! plate_scan - run plate extraction and recognition on a single image
//!
//! Useful for calibrating camera placement: prints where the candidate region
//! was found, the raw recognizer output and whether it passes the plate grammar.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use plate_relay::extract::DEFAULT_WORKING_WIDTH;
use plate_relay::recognize::recognizer_from_engine;
use plate_relay::{validate_plate, Frame, PlateCandidateExtractor, RecognizerSettings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scan one image for a licence plate")]
struct Args {
    /// Image file (PNG or JPEG).
    image: PathBuf,
    /// Recognizer engine: "tesseract" or "stub://<TEXT>".
    #[arg(long, default_value = "tesseract")]
    engine: String,
    /// Path to the tesseract binary.
    #[arg(long, default_value = "tesseract")]
    binary: String,
    /// Recognition language pack.
    #[arg(long, default_value = "eng")]
    language: String,
    /// Width frames are downscaled to before contour search.
    #[arg(long, default_value_t = DEFAULT_WORKING_WIDTH)]
    working_width: u32,
    /// Write the binarized candidate region here.
    #[arg(long)]
    save_region: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let image = image::open(&args.image)
        .with_context(|| format!("open image {}", args.image.display()))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    let frame = Frame::from_rgb(image.into_raw(), width, height, 0)?;

    let extractor = PlateCandidateExtractor::new(args.working_width);
    let Some(region) = extractor.extract(&frame) else {
        println!("no plate candidate in {}", args.image.display());
        return Ok(());
    };
    let (min_x, min_y, max_x, max_y) = region.quad.bounds();
    println!(
        "candidate: ({}, {}) - ({}, {}) corners={:?}",
        min_x, min_y, max_x, max_y, region.quad.0
    );

    if let Some(path) = &args.save_region {
        region
            .image
            .save(path)
            .with_context(|| format!("save region to {}", path.display()))?;
        println!("region written to {}", path.display());
    }

    let settings = RecognizerSettings {
        language: args.language,
        ..RecognizerSettings::default()
    };
    let mut recognizer = recognizer_from_engine(&args.engine, &args.binary, settings)?;
    recognizer.warm_up()?;
    let text = recognizer
        .recognize(&region.image)
        .map_err(|err| anyhow!("recognizer {} failed: {:#}", recognizer.name(), err))?;
    println!("raw text: {:?}", text);

    match validate_plate(&text) {
        Some(plate) => println!("plate: {}", plate),
        None => println!("rejected: does not match LLL-DDDLL"),
    }
    Ok(())
}
