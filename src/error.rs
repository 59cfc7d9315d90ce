//! Error types for posecast

use thiserror::Error;

/// Main error type for posecast
#[derive(Error, Debug)]
pub enum PosecastError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Perception error: {0}")]
    Perception(#[from] PerceptionError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture device errors.
///
/// A tick with no frame is not an error (see `capture::FrameGrab::Unavailable`);
/// these variants mean the device itself is gone, which is fatal.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open video device '{device}': {message}")]
    Open { device: String, message: String },

    #[error("Video device disconnected: {0}")]
    Disconnected(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Perception worker errors
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Failed to launch perception worker '{script}': {message}")]
    Launch { script: String, message: String },

    /// The worker produced no result within the configured bound.
    /// Retryable once per frame; distinct from an empty detection result.
    #[error("Inference exceeded {0} ms")]
    Timeout(u64),

    #[error("Perception worker protocol error: {0}")]
    Protocol(String),

    #[error("Perception worker exited: {0}")]
    WorkerExited(String),
}

/// Payload encoding errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("PNG encode failed: {0}")]
    Png(String),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Not connected")]
    NotConnected,
}

/// Structural pipeline failures, annotated with the stage and frame
/// sequence number for operator diagnosis.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} stage failed at frame {frame}: {source}")]
    Stage {
        stage: &'static str,
        frame: u64,
        #[source]
        source: Box<PosecastError>,
    },
}

impl PipelineError {
    /// Wrap a component error with stage and frame context.
    pub fn stage(stage: &'static str, frame: u64, source: impl Into<PosecastError>) -> Self {
        Self::Stage {
            stage,
            frame,
            source: Box::new(source.into()),
        }
    }
}

/// Result type alias for posecast operations
pub type Result<T> = std::result::Result<T, PosecastError>;
