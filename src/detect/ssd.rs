use std::{io::Cursor, path::PathBuf, time::Instant};

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use log::{debug, info};
use tract_onnx::prelude::*;

use super::{
    postprocess::{postprocess, PostprocessParams, RawDetection},
    Detector, Prediction,
};
use crate::config::DetectorConfig;

type SsdPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Where the ONNX graph comes from. Android ships it as an APK asset, read into memory.
pub enum ModelSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// TF object-detection SSD exported to ONNX: u8 NHWC input, boxes/classes/scores/count outputs.
pub struct SsdDetector {
    plan: SsdPlan,
    input_size: u32,
    params: PostprocessParams,
}

impl SsdDetector {
    pub fn load(source: ModelSource, config: &DetectorConfig) -> Result<Self> {
        let t = Instant::now();
        let onnx = tract_onnx::onnx();
        let model = match &source {
            ModelSource::Path(path) => onnx
                .model_for_path(path)
                .with_context(|| format!("Failed to load model: {}", path.display()))?,
            ModelSource::Bytes(bytes) => onnx
                .model_for_read(&mut Cursor::new(bytes))
                .context("Failed to load model from memory")?,
        };

        let side = config.input_size as usize;
        let names = &config.outputs;
        let plan = model
            .with_input_fact(0, u8::fact([1, side, side, 3]).into())?
            .with_output_names([&names.boxes, &names.classes, &names.scores, &names.count])
            .context("Model is missing an expected SSD output")?
            .into_optimized()?
            .into_runnable()?;
        info!("model ready in {}ms", t.elapsed().as_millis());

        Ok(Self {
            plan,
            input_size: config.input_size,
            params: PostprocessParams {
                min_score: config.min_score,
                iou_threshold: config.iou_threshold,
                max_detections: config.max_detections,
            },
        })
    }

    fn input_tensor(&self, image: &DynamicImage) -> Result<Tensor> {
        let side = self.input_size;
        let resized = image::imageops::resize(&image.to_rgb8(), side, side, FilterType::Triangle);
        let array = tract_ndarray::Array4::from_shape_vec(
            (1, side as usize, side as usize, 3),
            resized.into_raw(),
        )?;
        Ok(array.into())
    }
}

impl Detector for SsdDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Prediction>> {
        let t = Instant::now();
        let input = self.input_tensor(image)?;
        let outputs = self.plan.run(tvec!(input.into()))?;
        if outputs.len() < 4 {
            return Err(anyhow!("expected 4 model outputs, got {}", outputs.len()));
        }

        let boxes: Vec<f32> = outputs[0].to_array_view::<f32>()?.iter().copied().collect();
        let classes: Vec<f32> = outputs[1].to_array_view::<f32>()?.iter().copied().collect();
        let scores: Vec<f32> = outputs[2].to_array_view::<f32>()?.iter().copied().collect();
        let count = outputs[3]
            .to_array_view::<f32>()?
            .iter()
            .next()
            .map(|c| c.max(0.0) as usize)
            .unwrap_or(scores.len());

        let raw = raw_detections(&boxes, &classes, &scores, count);
        let (width, height) = image.dimensions();
        let predictions = postprocess(&raw, width, height, &self.params);
        debug!(
            "{} raw, {} kept in {}ms",
            raw.len(),
            predictions.len(),
            t.elapsed().as_millis()
        );
        Ok(predictions)
    }
}

/// Zips the flat SSD outputs into rows, honoring the graph's own detection count.
pub(crate) fn raw_detections(
    boxes: &[f32],
    classes: &[f32],
    scores: &[f32],
    count: usize,
) -> Vec<RawDetection> {
    let n = count
        .min(scores.len())
        .min(classes.len())
        .min(boxes.len() / 4);
    boxes
        .chunks_exact(4)
        .zip(classes)
        .zip(scores)
        .take(n)
        .map(|((b, class), score)| RawDetection {
            class_id: class.max(0.0).round() as u32,
            score: *score,
            bbox: [b[0], b[1], b[2], b[3]],
        })
        .collect()
}
