//! View state of the single screen, kept free of UI types so it can be driven from tests.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{error, info};

use crate::detect::{Detector, Prediction};
use crate::permission::PermissionState;
use crate::photo;

pub const LOADING_TEXT: &str = "Loading...";
pub const DENIED_TEXT: &str = "Access not Allowed!";
pub const NO_OBJECT_TEXT: &str = "No object detected";
pub const NO_MODEL_TEXT: &str = "Model not available";
pub const CAPTURE_FAILED_TEXT: &str = "Capture failed";
pub const DETECT_FAILED_TEXT: &str = "Detection failed";

/// What the screen shows right now.
#[derive(Debug, Clone, PartialEq)]
pub enum View<'a> {
    Loading,
    Denied,
    Camera {
        photo: Option<&'a Path>,
        label: &'a str,
    },
}

impl View<'_> {
    /// Full-screen message for the states that replace the camera.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            View::Loading => Some(LOADING_TEXT),
            View::Denied => Some(DENIED_TEXT),
            View::Camera { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelState {
    #[default]
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Default)]
pub struct ScreenState {
    pub permission: PermissionState,
    pub model: ModelState,
    pub photo: Option<PathBuf>,
    pub object_name: String,
    pub busy: bool,
}

/// Label for a finished detection: the first prediction's class, verbatim.
pub fn label_for(predictions: &[Prediction]) -> &str {
    predictions
        .first()
        .map(|p| p.class.as_str())
        .unwrap_or(NO_OBJECT_TEXT)
}

/// Worker side of a tap: read the photo back and run the model over it.
pub fn detect_photo(detector: &dyn Detector, path: &Path) -> Result<Vec<Prediction>> {
    let image = photo::load_photo(path)?;
    detector.detect(&image)
}

/// Detection job for a freshly captured photo, run off the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDetection {
    pub path: PathBuf,
}

impl PendingDetection {
    pub fn run(&self, detector: Option<&dyn Detector>) -> Result<Vec<Prediction>> {
        let detector = detector.ok_or_else(|| anyhow!("model not loaded"))?;
        detect_photo(detector, &self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TapOutcome {
    /// Busy or no camera permission; nothing was captured.
    Ignored,
    CaptureFailed,
    Captured {
        path: PathBuf,
        detection: Option<PendingDetection>,
    },
}

impl ScreenState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> View<'_> {
        match self.permission {
            PermissionState::Pending => View::Loading,
            PermissionState::Denied => View::Denied,
            PermissionState::Granted => View::Camera {
                photo: self.photo.as_deref(),
                label: &self.object_name,
            },
        }
    }

    pub fn set_permission(&mut self, permission: PermissionState) {
        info!("camera permission: {:?}", permission);
        self.permission = permission;
    }

    pub fn model_loaded(&mut self, ok: bool) {
        self.model = if ok { ModelState::Ready } else { ModelState::Failed };
    }

    /// Claims the single capture/detect slot. False while a tap is still being handled
    /// or the camera is not available.
    pub fn begin_capture(&mut self) -> bool {
        if self.busy || !self.permission.is_granted() {
            return false;
        }
        self.busy = true;
        true
    }

    /// Records the new photo. Returns whether a detection should follow.
    pub fn photo_captured(&mut self, path: PathBuf) -> bool {
        self.photo = Some(path);
        match self.model {
            ModelState::Ready => true,
            ModelState::Failed => {
                self.object_name = NO_MODEL_TEXT.to_string();
                self.busy = false;
                false
            }
            // still loading: keep the previous label, like a tap before the model exists
            ModelState::Loading => {
                self.busy = false;
                false
            }
        }
    }

    /// UI-thread half of a tap: claim the slot, capture, record the photo.
    /// The returned detection, if any, must end in `detection_finished`.
    pub fn handle_tap(&mut self, take_picture: impl FnOnce() -> Result<PathBuf>) -> TapOutcome {
        if !self.begin_capture() {
            info!("capture ignored, previous one still running");
            return TapOutcome::Ignored;
        }
        let path = match take_picture() {
            Ok(path) => path,
            Err(err) => {
                self.capture_failed(&err);
                return TapOutcome::CaptureFailed;
            }
        };
        let detection = self
            .photo_captured(path.clone())
            .then(|| PendingDetection { path: path.clone() });
        TapOutcome::Captured { path, detection }
    }

    pub fn capture_failed(&mut self, err: &anyhow::Error) {
        error!("capture failed: {err:?}");
        self.object_name = CAPTURE_FAILED_TEXT.to_string();
        self.busy = false;
    }

    pub fn detection_finished(&mut self, result: Result<Vec<Prediction>>) {
        self.object_name = match result {
            Ok(predictions) => {
                info!("{} predictions", predictions.len());
                label_for(&predictions).to_string()
            }
            Err(err) => {
                error!("detection failed: {err:?}");
                DETECT_FAILED_TEXT.to_string()
            }
        };
        self.busy = false;
    }
}
