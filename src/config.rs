//! Runtime configuration: model location, detection thresholds and camera setup.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "SLINT_DETECT_CONFIG";
/// Environment variable overriding `model_path`.
pub const MODEL_ENV: &str = "SLINT_DETECT_MODEL";

/// Names of the SSD graph outputs, in the order the detector reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputNames {
    pub boxes: String,
    pub classes: String,
    pub scores: String,
    pub count: String,
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            boxes: "detection_boxes:0".to_string(),
            classes: "detection_classes:0".to_string(),
            scores: "detection_scores:0".to_string(),
            count: "num_detections:0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ONNX file. On android this names an APK asset.
    pub model_path: PathBuf,
    /// Side of the square image fed to the model.
    pub input_size: u32,
    pub min_score: f32,
    pub max_detections: usize,
    pub iou_threshold: f32,
    pub outputs: OutputNames,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("ssd_mobilenet_v1_12.onnx"),
            input_size: 300,
            min_score: 0.5,
            max_detections: 20,
            iou_threshold: 0.5,
            outputs: OutputNames::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub camera_index: usize,
    pub preview_width: u32,
    pub preview_height: u32,
    /// Where captured photos are written. Falls back to the platform cache dir.
    pub capture_dir: Option<PathBuf>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            preview_width: 1280,
            preview_height: 720,
            capture_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub camera: CameraConfig,
}

impl AppConfig {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the file named by `SLINT_DETECT_CONFIG`, then `SLINT_DETECT_MODEL`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                info!("loading config from {:?}", path);
                Self::load(path)?
            }
            None => Self::default(),
        };
        if let Some(model) = std::env::var_os(MODEL_ENV) {
            config.detector.model_path = PathBuf::from(model);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.input_size == 0 {
            return Err(anyhow!("input_size must be positive"));
        }
        if !(0.0..=1.0).contains(&d.min_score) {
            return Err(anyhow!("min_score must be within [0, 1], got {}", d.min_score));
        }
        if !(d.iou_threshold > 0.0 && d.iou_threshold <= 1.0) {
            return Err(anyhow!(
                "iou_threshold must be within (0, 1], got {}",
                d.iou_threshold
            ));
        }
        if d.max_detections == 0 {
            return Err(anyhow!("max_detections must be positive"));
        }
        if self.camera.preview_width == 0 || self.camera.preview_height == 0 {
            return Err(anyhow!("preview size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.input_size, 300);
        assert_eq!(config.detector.max_detections, 20);
        assert_eq!(config.detector.outputs.boxes, "detection_boxes:0");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(r#"{ "detector": { "min_score": 0.3 } }"#);
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.detector.min_score, 0.3);
        assert_eq!(config.detector.iou_threshold, 0.5);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let file = write_config(r#"{ "detector": { "min_score": 1.5 } }"#);
        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_rejects_zero_iou() {
        let mut config = AppConfig::default();
        config.detector.iou_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(AppConfig::load("/nonexistent/config.json").is_err());
    }

    #[test]
    fn test_malformed_file() {
        let file = write_config("{ not json");
        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = AppConfig::default();
        config.detector.input_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detector.max_detections = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.camera.preview_height = 0;
        assert!(config.validate().is_err());
    }

    // The only test touching these variables, so it cannot race with another.
    #[test]
    fn test_from_env_layers_file_then_model_override() {
        std::env::remove_var(CONFIG_ENV);
        std::env::remove_var(MODEL_ENV);
        assert_eq!(AppConfig::from_env().unwrap(), AppConfig::default());

        let file = write_config(
            r#"{ "detector": { "model_path": "from_file.onnx", "min_score": 0.25 },
                 "camera": { "camera_index": 2 } }"#,
        );
        std::env::set_var(CONFIG_ENV, file.path());
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.detector.model_path, PathBuf::from("from_file.onnx"));

        std::env::set_var(MODEL_ENV, "override.onnx");
        let config = AppConfig::from_env().unwrap();
        std::env::remove_var(CONFIG_ENV);
        std::env::remove_var(MODEL_ENV);

        assert_eq!(config.detector.model_path, PathBuf::from("override.onnx"));
        assert_eq!(config.detector.min_score, 0.25);
        assert_eq!(config.camera.camera_index, 2);
    }
}
