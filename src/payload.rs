//! Per-frame payload construction
//!
//! Two mutually exclusive build modes, selected by configuration: landmark
//! mode extracts the configured joints from a pose landmark set, and
//! segmentation mode composites the camera frame against a constant fill
//! color using a foreground confidence mask.

use std::thread;

use crate::capture::Frame;
use crate::config::{Config, PerceptionMode};
use crate::error::ConfigError;
use crate::perception::{
    Landmark, LandmarkSet, PerceptionResult, SegmentationMask, POSE_LANDMARK_COUNT,
};

/// Ordered set of landmark indices to stream.
///
/// Validated against the landmark topology at construction; an out-of-range
/// index is a configuration error, never a per-frame condition.
#[derive(Debug, Clone)]
pub struct JointSelection {
    indices: Vec<usize>,
}

impl JointSelection {
    pub fn new(indices: Vec<usize>) -> Result<Self, ConfigError> {
        if indices.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "landmarks.joints".to_string(),
                message: "Joint selection must not be empty".to_string(),
            });
        }
        for &index in &indices {
            if index >= POSE_LANDMARK_COUNT {
                return Err(ConfigError::InvalidValue {
                    field: "landmarks.joints".to_string(),
                    message: format!(
                        "Joint index {} is out of range (model has {} landmarks)",
                        index, POSE_LANDMARK_COUNT
                    ),
                });
            }
        }
        Ok(Self { indices })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Ordered joint coordinates, one triple per selected joint
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateRecord {
    pub joints: Vec<Landmark>,
}

/// RGBA frame with background pixels replaced by the fill color
#[derive(Debug, Clone, PartialEq)]
pub struct CompositedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One frame's derived payload, ready for encoding
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Coordinates(CoordinateRecord),
    Composite(CompositedImage),
}

/// Mode-specific payload construction state
#[derive(Debug, Clone)]
pub enum PayloadBuilder {
    Landmarks(JointSelection),
    Segmentation(Compositor),
}

impl PayloadBuilder {
    /// Build from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        match config.perception.mode {
            PerceptionMode::Landmarks => Ok(Self::Landmarks(JointSelection::new(
                config.landmarks.joints.clone(),
            )?)),
            PerceptionMode::Segmentation => Ok(Self::Segmentation(Compositor::new(
                config.segmentation.threshold,
                config.segmentation.fill,
            ))),
        }
    }

    /// Derive the payload for one frame. Returns `None` when perception
    /// produced nothing this frame; the caller skips encoding and transport
    /// entirely (no placeholder message).
    pub fn build(&self, frame: &Frame, result: &PerceptionResult) -> Option<Payload> {
        match (self, result) {
            (_, PerceptionResult::Empty) => None,
            (Self::Landmarks(selection), PerceptionResult::Landmarks(set)) => Some(
                Payload::Coordinates(extract_coordinates(selection, set)),
            ),
            (Self::Segmentation(compositor), PerceptionResult::Mask(mask)) => {
                Some(Payload::Composite(compositor.composite(frame, mask)))
            }
            (_, other) => {
                tracing::warn!(
                    "Perception result kind '{}' does not match the configured mode, skipping frame",
                    other.kind()
                );
                None
            }
        }
    }
}

/// Look up each selected joint in selection order.
///
/// Indices were validated against the topology at startup and the landmark
/// set is guaranteed full-size by the worker protocol, so the lookup itself
/// cannot fail.
fn extract_coordinates(selection: &JointSelection, set: &LandmarkSet) -> CoordinateRecord {
    let joints = selection
        .indices()
        .iter()
        .filter_map(|&index| set.get(index).copied())
        .collect();
    CoordinateRecord { joints }
}

/// Background-replacement compositor.
///
/// The fill color is configuration state: set once here, read-only afterwards.
#[derive(Debug, Clone)]
pub struct Compositor {
    threshold: f32,
    fill: [u8; 4],
}

impl Compositor {
    pub fn new(threshold: f32, fill: [u8; 4]) -> Self {
        Self { threshold, fill }
    }

    /// Composite one frame against its mask.
    ///
    /// A pixel is foreground iff its confidence is strictly greater than the
    /// threshold; equality means background. The decision is pointwise, so
    /// the image is split into row bands processed on scoped threads.
    pub fn composite(&self, frame: &Frame, mask: &SegmentationMask) -> CompositedImage {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let bpp = frame.format.bytes_per_pixel();
        debug_assert_eq!(mask.width, frame.width);
        debug_assert_eq!(mask.height, frame.height);

        let mut out = vec![0u8; width * height * 4];

        let bands = band_count(height);
        if bands <= 1 {
            composite_rows(
                &mut out,
                &frame.data,
                &mask.confidence,
                bpp,
                self.threshold,
                self.fill,
            );
        } else {
            let rows_per_band = height.div_ceil(bands);
            let out_band = rows_per_band * width * 4;
            let src_band = rows_per_band * width * bpp;
            let mask_band = rows_per_band * width;

            thread::scope(|scope| {
                for ((out_chunk, src_chunk), mask_chunk) in out
                    .chunks_mut(out_band)
                    .zip(frame.data.chunks(src_band))
                    .zip(mask.confidence.chunks(mask_band))
                {
                    let threshold = self.threshold;
                    let fill = self.fill;
                    scope.spawn(move || {
                        composite_rows(out_chunk, src_chunk, mask_chunk, bpp, threshold, fill);
                    });
                }
            });
        }

        CompositedImage {
            data: out,
            width: frame.width,
            height: frame.height,
        }
    }
}

/// Number of compositing bands for an image of `height` rows.
/// Small images are not worth the spawn overhead.
fn band_count(height: usize) -> usize {
    if height < 64 {
        1
    } else {
        num_cpus::get().min(height)
    }
}

fn composite_rows(
    out: &mut [u8],
    src: &[u8],
    confidence: &[f32],
    bpp: usize,
    threshold: f32,
    fill: [u8; 4],
) {
    for ((out_px, src_px), &conf) in out
        .chunks_exact_mut(4)
        .zip(src.chunks_exact(bpp))
        .zip(confidence.iter())
    {
        if conf > threshold {
            out_px[0] = src_px[0];
            out_px[1] = src_px[1];
            out_px[2] = src_px[2];
            out_px[3] = if bpp == 4 { src_px[3] } else { 255 };
        } else {
            out_px.copy_from_slice(&fill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    fn rgb_frame(width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width,
            height,
            format: PixelFormat::Rgb8,
            seq: 1,
            timestamp_ms: 0,
        }
    }

    fn rgba_frame(width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width,
            height,
            format: PixelFormat::Rgba8,
            seq: 1,
            timestamp_ms: 0,
        }
    }

    fn full_landmark_set() -> LandmarkSet {
        let points = (0..POSE_LANDMARK_COUNT)
            .map(|i| Landmark {
                x: i as f32 * 0.1,
                y: i as f32 * 0.2,
                z: i as f32 * 0.3,
            })
            .collect();
        LandmarkSet::new(points)
    }

    #[test]
    fn test_joint_selection_rejects_out_of_range() {
        let err = JointSelection::new(vec![0, POSE_LANDMARK_COUNT]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_joint_selection_rejects_empty() {
        assert!(JointSelection::new(vec![]).is_err());
    }

    #[test]
    fn test_extract_preserves_selection_order() {
        let selection = JointSelection::new(vec![20, 0, 15]).unwrap();
        let record = extract_coordinates(&selection, &full_landmark_set());
        assert_eq!(record.joints.len(), 3);
        assert!((record.joints[0].x - 2.0).abs() < 1e-6);
        assert!((record.joints[1].x - 0.0).abs() < 1e-6);
        assert!((record.joints[2].x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_default_selection_encodes_expected_wire_text() {
        // Nose, wrists, index fingertips against a known landmark set
        let mut points = vec![
            Landmark {
                x: 0.0,
                y: 0.0,
                z: 0.0
            };
            POSE_LANDMARK_COUNT
        ];
        points[0] = Landmark { x: 0.1, y: 0.2, z: 0.3 };
        points[15] = Landmark { x: 1.0, y: 2.0, z: 3.0 };
        points[16] = Landmark { x: -1.0, y: -2.0, z: -3.0 };
        points[19] = Landmark { x: 0.5, y: 0.5, z: 0.5 };
        points[20] = Landmark { x: 0.25, y: 0.25, z: 0.25 };
        let set = LandmarkSet::new(points);

        let selection = JointSelection::new(vec![0, 15, 16, 19, 20]).unwrap();
        let record = extract_coordinates(&selection, &set);
        let bytes = crate::encode::encode_coordinates(&record);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "0.1,0.2,0.3;1,2,3;-1,-2,-3;0.5,0.5,0.5;0.25,0.25,0.25"
        );
    }

    #[test]
    fn test_empty_result_builds_no_payload() {
        let builder = PayloadBuilder::Landmarks(JointSelection::new(vec![0]).unwrap());
        let frame = rgb_frame(2, 1, vec![0; 6]);
        assert!(builder.build(&frame, &PerceptionResult::Empty).is_none());
    }

    #[test]
    fn test_mode_mismatch_builds_no_payload() {
        let builder = PayloadBuilder::Landmarks(JointSelection::new(vec![0]).unwrap());
        let frame = rgb_frame(2, 1, vec![0; 6]);
        let mask = SegmentationMask {
            confidence: vec![1.0, 1.0],
            width: 2,
            height: 1,
        };
        assert!(builder
            .build(&frame, &PerceptionResult::Mask(mask))
            .is_none());
    }

    #[test]
    fn test_composite_foreground_and_fill() {
        let frame = rgb_frame(2, 1, vec![10, 20, 30, 40, 50, 60]);
        let mask = SegmentationMask {
            confidence: vec![0.9, 0.0],
            width: 2,
            height: 1,
        };
        let compositor = Compositor::new(0.1, [1, 2, 3, 4]);
        let out = compositor.composite(&frame, &mask);
        assert_eq!(out.data, vec![10, 20, 30, 255, 1, 2, 3, 4]);
    }

    #[test]
    fn test_threshold_equality_is_background() {
        // Confidence exactly at the threshold must not count as foreground
        let frame = rgb_frame(1, 1, vec![200, 200, 200]);
        let mask = SegmentationMask {
            confidence: vec![0.1],
            width: 1,
            height: 1,
        };
        let compositor = Compositor::new(0.1, [0, 0, 0, 0]);
        let out = compositor.composite(&frame, &mask);
        assert_eq!(out.data, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_confidence_just_above_threshold_is_foreground() {
        let frame = rgb_frame(1, 1, vec![200, 100, 50]);
        let mask = SegmentationMask {
            confidence: vec![0.1 + f32::EPSILON],
            width: 1,
            height: 1,
        };
        let compositor = Compositor::new(0.1, [0, 0, 0, 0]);
        let out = compositor.composite(&frame, &mask);
        assert_eq!(out.data, vec![200, 100, 50, 255]);
    }

    #[test]
    fn test_composite_is_idempotent() {
        let width = 8u32;
        let height = 80u32; // tall enough to exercise the banded path
        let pixels = (width * height) as usize;
        let data: Vec<u8> = (0..pixels * 3).map(|v| (v % 251) as u8).collect();
        let confidence: Vec<f32> = (0..pixels).map(|i| (i % 10) as f32 / 10.0).collect();

        let frame = rgb_frame(width, height, data);
        let mask = SegmentationMask {
            confidence,
            width,
            height,
        };
        let compositor = Compositor::new(0.1, [9, 8, 7, 0]);

        let first = compositor.composite(&frame, &mask);
        let again = compositor.composite(
            &rgba_frame(width, height, first.data.clone()),
            &mask,
        );
        assert_eq!(first, again);
    }

    #[test]
    fn test_composite_preserves_source_alpha_for_rgba() {
        let frame = rgba_frame(1, 1, vec![10, 20, 30, 77]);
        let mask = SegmentationMask {
            confidence: vec![1.0],
            width: 1,
            height: 1,
        };
        let compositor = Compositor::new(0.1, [0, 0, 0, 0]);
        let out = compositor.composite(&frame, &mask);
        assert_eq!(out.data, vec![10, 20, 30, 77]);
    }

    #[test]
    fn test_banded_matches_single_threaded() {
        let width = 16u32;
        let height = 128u32;
        let pixels = (width * height) as usize;
        let data: Vec<u8> = (0..pixels * 3).map(|v| (v * 7 % 256) as u8).collect();
        let confidence: Vec<f32> = (0..pixels).map(|i| ((i * 13) % 100) as f32 / 100.0).collect();

        let frame = rgb_frame(width, height, data.clone());
        let mask = SegmentationMask {
            confidence: confidence.clone(),
            width,
            height,
        };
        let compositor = Compositor::new(0.5, [1, 1, 1, 1]);
        let banded = compositor.composite(&frame, &mask);

        let mut reference = vec![0u8; pixels * 4];
        composite_rows(&mut reference, &data, &confidence, 3, 0.5, [1, 1, 1, 1]);
        assert_eq!(banded.data, reference);
    }
}
