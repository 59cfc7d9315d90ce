//! Perception boundary
//!
//! The model itself is an external capability: anything that maps a frame to
//! a [`PerceptionResult`] behind the [`Perceptor`] trait. The production
//! implementation is a managed Python worker subprocess (see [`worker`]); the
//! pipeline never depends on a concrete model.

pub mod worker;

use crate::capture::Frame;
use crate::error::PerceptionError;

/// Number of landmarks in the pose topology
pub const POSE_LANDMARK_COUNT: usize = 33;

/// Landmark names in topology order
pub const POSE_LANDMARK_NAMES: [&str; POSE_LANDMARK_COUNT] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

/// One 3D point in model world coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A full set of pose landmarks, in topology order
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    /// Build a set from topology-ordered points. The worker protocol
    /// guarantees exactly [`POSE_LANDMARK_COUNT`] entries; anything else is
    /// rejected at the protocol layer before this constructor runs.
    pub fn new(points: Vec<Landmark>) -> Self {
        debug_assert_eq!(points.len(), POSE_LANDMARK_COUNT);
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Topology name for a landmark index
    pub fn name(index: usize) -> Option<&'static str> {
        POSE_LANDMARK_NAMES.get(index).copied()
    }
}

/// Per-pixel foreground confidence, same dimensions as the source frame
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    pub confidence: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// Outcome of one inference call.
///
/// `Empty` is a valid result (nothing detected this frame), distinct from a
/// timeout or any worker fault.
#[derive(Debug, Clone, PartialEq)]
pub enum PerceptionResult {
    Landmarks(LandmarkSet),
    Mask(SegmentationMask),
    Empty,
}

impl PerceptionResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Landmarks(_) => "landmarks",
            Self::Mask(_) => "mask",
            Self::Empty => "empty",
        }
    }
}

/// External perception capability.
///
/// `infer` either returns within the implementation's configured bound or
/// fails with [`PerceptionError::Timeout`]; it never blocks indefinitely.
pub trait Perceptor {
    fn infer(&mut self, frame: &Frame) -> Result<PerceptionResult, PerceptionError>;

    /// Release any resources held by the implementation. Idempotent.
    fn close(&mut self) {}
}
