use std::cmp::Ordering;

use super::{labels::coco_label, Prediction};

/// One row of raw SSD output. Box is normalized `[ymin, xmin, ymax, xmax]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub score: f32,
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, Copy)]
pub struct PostprocessParams {
    pub min_score: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

fn area(b: &[f32; 4]) -> f32 {
    (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ymin = a[0].max(b[0]);
    let xmin = a[1].max(b[1]);
    let ymax = a[2].min(b[2]);
    let xmax = a[3].min(b[3]);
    let inter = (ymax - ymin).max(0.0) * (xmax - xmin).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy class-agnostic NMS. Returns survivors ordered by descending score.
pub fn non_max_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<RawDetection> = Vec::new();
    for det in detections {
        if kept.len() >= max_detections {
            break;
        }
        if kept.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

/// Filters, suppresses and scales raw detections to `[x, y, w, h]` pixel boxes.
pub fn postprocess(
    raw: &[RawDetection],
    image_width: u32,
    image_height: u32,
    params: &PostprocessParams,
) -> Vec<Prediction> {
    let candidates = raw
        .iter()
        .filter(|d| d.score.is_finite() && d.score >= params.min_score)
        .copied()
        .collect();
    let (w, h) = (image_width as f32, image_height as f32);
    non_max_suppression(candidates, params.iou_threshold, params.max_detections)
        .into_iter()
        .map(|d| {
            let ymin = d.bbox[0].clamp(0.0, 1.0) * h;
            let xmin = d.bbox[1].clamp(0.0, 1.0) * w;
            let ymax = d.bbox[2].clamp(0.0, 1.0) * h;
            let xmax = d.bbox[3].clamp(0.0, 1.0) * w;
            Prediction {
                class: coco_label(d.class_id).to_string(),
                score: d.score,
                bbox: [xmin, ymin, (xmax - xmin).max(0.0), (ymax - ymin).max(0.0)],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, score: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_id,
            score,
            bbox,
        }
    }

    fn params() -> PostprocessParams {
        PostprocessParams {
            min_score: 0.5,
            iou_threshold: 0.5,
            max_detections: 20,
        }
    }

    #[test]
    fn test_iou() {
        let a = [0.0, 0.0, 1.0, 1.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &[2.0, 2.0, 3.0, 3.0]), 0.0);
        let half = [0.0, 0.0, 1.0, 0.5];
        assert!((iou(&a, &half) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_filters_low_scores() {
        let raw = [det(1, 0.4, [0.0, 0.0, 0.5, 0.5]), det(18, 0.9, [0.5, 0.5, 1.0, 1.0])];
        let out = postprocess(&raw, 100, 100, &params());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, "dog");
    }

    #[test]
    fn test_sorted_by_score_and_suppressed() {
        let raw = [
            det(17, 0.6, [0.0, 0.0, 0.5, 0.5]),
            det(1, 0.95, [0.5, 0.5, 1.0, 1.0]),
            // heavy overlap with the person box, lower score
            det(18, 0.8, [0.5, 0.5, 0.98, 1.0]),
        ];
        let out = postprocess(&raw, 100, 100, &params());
        let classes: Vec<_> = out.iter().map(|p| p.class.as_str()).collect();
        assert_eq!(classes, ["person", "cat"]);
    }

    #[test]
    fn test_truncates_to_max() {
        let raw: Vec<_> = (0..10)
            .map(|i| {
                let y = i as f32 * 0.1;
                det(1, 0.9, [y, 0.0, y + 0.05, 0.05])
            })
            .collect();
        let mut p = params();
        p.max_detections = 3;
        assert_eq!(postprocess(&raw, 10, 10, &p).len(), 3);
    }

    #[test]
    fn test_scales_to_pixels() {
        let raw = [det(3, 0.7, [0.25, 0.1, 0.75, 0.6])];
        let out = postprocess(&raw, 200, 100, &params());
        let [x, y, w, h] = out[0].bbox;
        assert!((x - 20.0).abs() < 1e-4);
        assert!((y - 25.0).abs() < 1e-4);
        assert!((w - 100.0).abs() < 1e-4);
        assert!((h - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_clamps_out_of_frame_boxes() {
        let raw = [det(3, 0.7, [-0.2, -0.1, 1.3, 1.2])];
        let out = postprocess(&raw, 50, 40, &params());
        assert_eq!(out[0].bbox, [0.0, 0.0, 50.0, 40.0]);
    }

    #[test]
    fn test_empty_input() {
        assert!(postprocess(&[], 10, 10, &params()).is_empty());
    }
}
