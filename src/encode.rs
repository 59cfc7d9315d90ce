//! Payload serialization
//!
//! Coordinate records become a compact ASCII format the remote consumer can
//! parse with plain string splitting: `x,y,z` per joint, joints separated by
//! `;`, no trailing separator. The encoding is byte-for-byte deterministic
//! for identical input. Composited frames become lossless RGBA PNG.

use std::fmt::Write as FmtWrite;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use crate::config::PngCompression;
use crate::error::EncodeError;
use crate::payload::{CompositedImage, CoordinateRecord, Payload};

/// Field separator inside one joint triple
pub const FIELD_SEPARATOR: char = ',';
/// Record separator between joints
pub const RECORD_SEPARATOR: char = ';';

/// Encode a payload into wire bytes.
pub fn encode_payload(
    payload: &Payload,
    compression: PngCompression,
) -> Result<Vec<u8>, EncodeError> {
    match payload {
        Payload::Coordinates(record) => Ok(encode_coordinates(record)),
        Payload::Composite(image) => encode_composite(image, compression),
    }
}

/// Render a coordinate record as `x,y,z;x,y,z;...` UTF-8 text.
pub fn encode_coordinates(record: &CoordinateRecord) -> Vec<u8> {
    let mut text = String::new();
    for (i, joint) in record.joints.iter().enumerate() {
        if i > 0 {
            text.push(RECORD_SEPARATOR);
        }
        // Infallible for String
        let _ = write!(
            text,
            "{}{}{}{}{}",
            joint.x, FIELD_SEPARATOR, joint.y, FIELD_SEPARATOR, joint.z
        );
    }
    text.into_bytes()
}

/// Encode a composited frame as RGBA PNG.
///
/// The compression level trades size for CPU time; every level is lossless
/// and keeps the alpha channel intact.
pub fn encode_composite(
    image: &CompositedImage,
    compression: PngCompression,
) -> Result<Vec<u8>, EncodeError> {
    let level = match compression {
        PngCompression::Fast => CompressionType::Fast,
        PngCompression::Default => CompressionType::Default,
        PngCompression::Best => CompressionType::Best,
    };

    let mut bytes = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut bytes, level, FilterType::Adaptive);
    encoder
        .write_image(&image.data, image.width, image.height, ExtendedColorType::Rgba8)
        .map_err(|e| EncodeError::Png(e.to_string()))?;
    Ok(bytes)
}
