use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use slint_camera_detect::{
    camera::{frame::Frame, take_picture_from, FrameSlot},
    detect::{Detector, Prediction},
    permission::PermissionState,
    screen::{ScreenState, TapOutcome, View, DENIED_TEXT, NO_MODEL_TEXT, NO_OBJECT_TEXT},
};

/// Returns canned predictions and remembers the size of every image it was given.
struct CannedDetector {
    predictions: Vec<Prediction>,
    seen: Mutex<Vec<(u32, u32)>>,
}

impl CannedDetector {
    fn new(classes: &[&str]) -> Self {
        Self {
            predictions: classes
                .iter()
                .enumerate()
                .map(|(i, class)| Prediction {
                    class: class.to_string(),
                    score: 0.9 - i as f32 * 0.1,
                    bbox: [0.0, 0.0, 10.0, 10.0],
                })
                .collect(),
            seen: Mutex::new(vec![]),
        }
    }
}

impl Detector for CannedDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Prediction>> {
        self.seen.lock().unwrap().push(image.dimensions());
        Ok(self.predictions.clone())
    }
}

fn slot_with_frame(width: u32, height: u32) -> FrameSlot {
    let slot = FrameSlot::new();
    slot.put(Frame::new(RgbaImage::from_pixel(
        width,
        height,
        Rgba([10, 120, 200, 255]),
    )));
    slot
}

/// Drives a tap the way the UI does: capture on the caller, then the pending detection.
fn tap(
    state: &mut ScreenState,
    slot: &FrameSlot,
    dir: &std::path::Path,
    detector: &dyn Detector,
) -> Option<PathBuf> {
    match state.handle_tap(|| take_picture_from(slot, dir)) {
        TapOutcome::Captured { path, detection } => {
            if let Some(detection) = detection {
                state.detection_finished(detection.run(Some(detector)));
            }
            Some(path)
        }
        TapOutcome::Ignored | TapOutcome::CaptureFailed => None,
    }
}

fn ready_state() -> ScreenState {
    let mut state = ScreenState::new();
    state.set_permission(PermissionState::Granted);
    state.model_loaded(true);
    state
}

#[test]
fn first_prediction_becomes_label() {
    let dir = tempfile::tempdir().unwrap();
    let detector = CannedDetector::new(&["dog", "person"]);
    let mut state = ready_state();

    let path = tap(&mut state, &slot_with_frame(64, 48), dir.path(), &detector).unwrap();

    assert!(path.exists());
    assert_eq!(
        state.view(),
        View::Camera {
            photo: Some(path.as_path()),
            label: "dog",
        }
    );
    // the detector saw the decoded file, not the in-memory frame
    assert_eq!(*detector.seen.lock().unwrap(), vec![(64, 48)]);
}

#[test]
fn empty_predictions_show_no_object() {
    let dir = tempfile::tempdir().unwrap();
    let detector = CannedDetector::new(&[]);
    let mut state = ready_state();

    tap(&mut state, &slot_with_frame(8, 8), dir.path(), &detector).unwrap();

    assert_eq!(state.object_name, NO_OBJECT_TEXT);
}

#[test]
fn denied_permission_never_captures() {
    let dir = tempfile::tempdir().unwrap();
    let detector = CannedDetector::new(&["cup"]);
    let mut state = ScreenState::new();
    state.set_permission(PermissionState::Denied);

    assert!(tap(&mut state, &slot_with_frame(8, 8), dir.path(), &detector).is_none());
    assert_eq!(state.view().message(), Some(DENIED_TEXT));
    assert!(detector.seen.lock().unwrap().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn missing_frame_reports_capture_failure() {
    let dir = tempfile::tempdir().unwrap();
    let detector = CannedDetector::new(&["cup"]);
    let mut state = ready_state();

    assert!(tap(&mut state, &FrameSlot::new(), dir.path(), &detector).is_none());
    assert_eq!(state.object_name, "Capture failed");
    assert!(state.photo.is_none());
    assert!(!state.busy);
}

#[test]
fn detector_works_behind_shared_handle() {
    let dir = tempfile::tempdir().unwrap();
    let detector: Arc<dyn Detector> = Arc::new(CannedDetector::new(&["laptop"]));
    let mut state = ready_state();

    tap(&mut state, &slot_with_frame(16, 16), dir.path(), &detector).unwrap();

    assert_eq!(state.object_name, "laptop");
}

#[test]
fn second_tap_replaces_photo_and_label() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = ready_state();

    let first = tap(
        &mut state,
        &slot_with_frame(8, 8),
        dir.path(),
        &CannedDetector::new(&["cat"]),
    )
    .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = tap(
        &mut state,
        &slot_with_frame(8, 8),
        dir.path(),
        &CannedDetector::new(&[]),
    )
    .unwrap();

    assert_ne!(first, second);
    assert_eq!(state.photo.as_deref(), Some(second.as_path()));
    assert_eq!(state.object_name, NO_OBJECT_TEXT);
}

#[test]
fn failed_model_previews_photo_without_detecting() {
    let dir = tempfile::tempdir().unwrap();
    let detector = CannedDetector::new(&["cup"]);
    let mut state = ScreenState::new();
    state.set_permission(PermissionState::Granted);
    state.model_loaded(false);

    let path = tap(&mut state, &slot_with_frame(8, 8), dir.path(), &detector).unwrap();

    assert_eq!(state.photo.as_deref(), Some(path.as_path()));
    assert_eq!(state.object_name, NO_MODEL_TEXT);
    assert!(detector.seen.lock().unwrap().is_empty());
}
