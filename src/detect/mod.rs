use anyhow::Result;
use image::DynamicImage;

pub mod labels;
pub mod postprocess;
mod ssd;

pub use ssd::{ModelSource, SsdDetector};

/// A detected object. `bbox` is `[x, y, width, height]` in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// Runs a pretrained model over an image. Predictions come back best first.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Prediction>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Prediction>> {
        (**self).detect(image)
    }
}

impl<D: Detector + ?Sized> Detector for std::sync::Arc<D> {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Prediction>> {
        (**self).detect(image)
    }
}
