//! posecast - Headless Perception Streaming Service
//!
//! A Rust service that puppeteers a remote 3D avatar from a live camera:
//! - Captures frames from a V4L2 device (or any ffmpeg-readable source)
//! - Runs pose landmark or selfie segmentation perception in a managed
//!   worker subprocess
//! - Streams per-frame results to a remote consumer over one persistent
//!   TCP connection with length-prefixed message framing

pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod payload;
pub mod perception;
pub mod pipeline;
pub mod transport;

pub use config::Config;
pub use error::{PosecastError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
