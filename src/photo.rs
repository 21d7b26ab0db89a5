//! Still photos on disk: the camera writes them, the detector reads them back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, RgbaImage};
use log::info;

const JPEG_QUALITY: u8 = 90;

/// Timestamped photo file name inside `dir`.
pub fn photo_path(dir: &Path) -> PathBuf {
    let name = chrono::Local::now()
        .format("IMG_%Y%m%d_%H%M%S_%3f.jpg")
        .to_string();
    dir.join(name)
}

/// Encodes a frame as JPEG into `dir` and returns the file path.
pub fn save_photo(image: &RgbaImage, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create capture dir: {}", dir.display()))?;
    let path = photo_path(dir);

    // jpeg has no alpha channel
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create photo: {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(&rgb)
        .with_context(|| format!("Failed to encode photo: {}", path.display()))?;

    info!("photo saved: {} ({}x{})", path.display(), rgb.width(), rgb.height());
    Ok(path)
}

/// Reads a photo's bytes and decodes them.
pub fn load_photo(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read photo: {}", path.display()))?;
    image::load_from_memory(&bytes)
        .with_context(|| format!("Failed to decode photo: {}", path.display()))
}
