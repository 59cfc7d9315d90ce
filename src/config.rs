//! Configuration parsing and management for posecast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, PosecastError};
use crate::perception::POSE_LANDMARK_COUNT;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub perception: PerceptionConfig,
    pub landmarks: LandmarkConfig,
    pub segmentation: SegmentationConfig,
    pub stream: StreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            perception: PerceptionConfig::default(),
            landmarks: LandmarkConfig::default(),
            segmentation: SegmentationConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PosecastError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(s: &str) -> Result<Self, PosecastError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, PosecastError> {
        // Try config paths in order
        let paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("config/default.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration.
    ///
    /// Runs before the pipeline starts; every rejection here is a startup
    /// failure, never a per-frame condition.
    pub fn validate(&self) -> Result<(), PosecastError> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capture.width/height".to_string(),
                message: "Capture dimensions must be greater than 0".to_string(),
            }
            .into());
        }

        if self.capture.fps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capture.fps".to_string(),
                message: "Capture FPS must be greater than 0".to_string(),
            }
            .into());
        }

        if self.perception.infer_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "perception.infer_timeout_ms".to_string(),
                message: "Inference timeout must be greater than 0".to_string(),
            }
            .into());
        }

        if self.perception.mode == PerceptionMode::Landmarks {
            if self.landmarks.joints.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "landmarks.joints".to_string(),
                    message: "Joint selection must not be empty".to_string(),
                }
                .into());
            }

            for &joint in &self.landmarks.joints {
                if joint >= POSE_LANDMARK_COUNT {
                    return Err(ConfigError::InvalidValue {
                        field: "landmarks.joints".to_string(),
                        message: format!(
                            "Joint index {} is out of range (model has {} landmarks)",
                            joint, POSE_LANDMARK_COUNT
                        ),
                    }
                    .into());
                }
            }
        }

        if !(0.0..=1.0).contains(&self.segmentation.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "segmentation.threshold".to_string(),
                message: "Threshold must be between 0.0 and 1.0".to_string(),
            }
            .into());
        }

        if self.stream.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stream.port".to_string(),
                message: "Port must be greater than 0".to_string(),
            }
            .into());
        }

        let script = Path::new(&self.perception.worker_script);
        if !script.exists() {
            tracing::warn!(
                "Perception worker script not found at: {}",
                self.perception.worker_script
            );
        }

        Ok(())
    }
}

/// Camera capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index or path ("0", "/dev/video0", or a stream URI)
    pub device: String,
    /// Capture width in pixels
    pub width: u32,
    /// Capture height in pixels
    pub height: u32,
    /// Requested capture frame rate
    pub fps: u32,
    /// Mirror frames horizontally (selfie view)
    pub mirror: bool,
    /// How long acquire() waits for the next frame before reporting
    /// the device as momentarily unavailable
    pub acquire_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            mirror: false,
            acquire_timeout_ms: 500,
        }
    }
}

/// Perception worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// Which perception output to stream
    pub mode: PerceptionMode,
    /// Path to the worker script
    pub worker_script: String,
    /// Python interpreter used to launch the worker
    pub python: String,
    /// Upper bound on a single inference round-trip
    pub infer_timeout_ms: u64,
    /// Directory to store/cache model files
    pub model_dir: String,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            mode: PerceptionMode::Landmarks,
            worker_script: "scripts/perception_worker.py".to_string(),
            python: "python3".to_string(),
            infer_timeout_ms: 200,
            model_dir: ".".to_string(),
        }
    }
}

/// Perception output selection. Modes are mutually exclusive per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerceptionMode {
    /// Stream selected pose landmark coordinates as text records
    Landmarks,
    /// Stream background-removed frames as PNG images
    Segmentation,
}

impl Default for PerceptionMode {
    fn default() -> Self {
        Self::Landmarks
    }
}

impl PerceptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landmarks => "landmarks",
            Self::Segmentation => "segmentation",
        }
    }
}

impl std::str::FromStr for PerceptionMode {
    type Err = PosecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "landmarks" => Ok(Self::Landmarks),
            "segmentation" => Ok(Self::Segmentation),
            other => Err(ConfigError::InvalidValue {
                field: "perception.mode".to_string(),
                message: format!("Unknown mode '{}' (expected 'landmarks' or 'segmentation')", other),
            }
            .into()),
        }
    }
}

/// Landmark streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkConfig {
    /// Ordered landmark indices to stream, in wire order.
    /// Defaults to nose, wrists, and index fingertips.
    pub joints: Vec<usize>,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            joints: vec![0, 15, 16, 19, 20],
        }
    }
}

/// Segmentation streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Foreground confidence threshold; a pixel is foreground iff its
    /// confidence is strictly greater than this value
    pub threshold: f32,
    /// RGBA fill for background pixels
    pub fill: [u8; 4],
    /// PNG compression level (trades size for CPU, never lossy)
    pub png_compression: PngCompression,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            fill: [0, 0, 0, 0],
            png_compression: PngCompression::Fast,
        }
    }
}

/// PNG compression level selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    Default,
    Best,
}

impl Default for PngCompression {
    fn default() -> Self {
        Self::Fast
    }
}

/// Remote consumer endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Consumer host
    pub host: String,
    /// Consumer port
    pub port: u16,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// TCP write timeout for a single message
    pub write_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12000,
            connect_timeout_ms: 3000,
            write_timeout_ms: 5000,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("posecast");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/posecast");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/posecast");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("posecast");
        }
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capture.device, "/dev/video0");
        assert_eq!(config.perception.mode, PerceptionMode::Landmarks);
        assert_eq!(config.landmarks.joints, vec![0, 15, 16, 19, 20]);
        assert_eq!(config.stream.port, 12000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [capture]
            device = "/dev/video2"
            width = 1280
            height = 720

            [perception]
            mode = "segmentation"

            [segmentation]
            threshold = 0.25
            fill = [0, 255, 0, 255]

            [stream]
            host = "192.168.1.20"
            port = 9000
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.capture.device, "/dev/video2");
        assert_eq!(config.capture.width, 1280);
        assert_eq!(config.perception.mode, PerceptionMode::Segmentation);
        assert_eq!(config.segmentation.threshold, 0.25);
        assert_eq!(config.segmentation.fill, [0, 255, 0, 255]);
        assert_eq!(config.stream.host, "192.168.1.20");
        assert_eq!(config.stream.port, 9000);
    }

    #[test]
    fn test_joint_out_of_range_rejected() {
        let mut config = Config::default();
        config.landmarks.joints = vec![0, 15, 99];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("landmarks.joints"));
    }

    #[test]
    fn test_empty_joints_rejected() {
        let mut config = Config::default();
        config.landmarks.joints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_joints_ignored_in_segmentation_mode() {
        let mut config = Config::default();
        config.perception.mode = PerceptionMode::Segmentation;
        config.landmarks.joints = vec![99];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = Config::default();
        config.segmentation.threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("segmentation.threshold"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = Config::default();
        config.stream.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "segmentation".parse::<PerceptionMode>().unwrap(),
            PerceptionMode::Segmentation
        );
        assert!("pose".parse::<PerceptionMode>().is_err());
    }
}
