//! Camera frame acquisition
//!
//! Frames come from an `ffmpeg` child process decoding the capture device to
//! raw `rgb24` over a stdout pipe. A dedicated reader thread drains the pipe
//! into a small bounded channel so the device keeps advancing while the
//! pipeline works; `acquire()` is a bounded wait against that channel.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// One captured image, owned by the pipeline for a single iteration
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonically increasing per-source sequence number, starting at 1
    pub seq: u64,
    pub timestamp_ms: i64,
}

/// Outcome of a single acquisition attempt
#[derive(Debug)]
pub enum FrameGrab {
    Frame(Frame),
    /// The device produced no frame within the acquire timeout.
    /// The caller retries; this is not a fault.
    Unavailable,
}

/// A source of frames. The device handle is exclusively owned by the
/// implementation and released exactly once by `close()` (or drop).
pub trait FrameSource {
    fn acquire(&mut self) -> Result<FrameGrab, CaptureError>;
    fn close(&mut self);
}

/// V4L2 camera source backed by an ffmpeg decode child.
pub struct CameraSource {
    config: CaptureConfig,
    child: Option<Child>,
    frames: Option<Receiver<Result<Vec<u8>, CaptureError>>>,
    reader: Option<JoinHandle<()>>,
    next_seq: u64,
}

impl CameraSource {
    /// Open the capture device and start decoding.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        if let Some(index) = parse_device_index(&config.device) {
            cmd.arg("-f")
                .arg("video4linux2")
                .arg("-framerate")
                .arg(config.fps.to_string())
                .arg("-video_size")
                .arg(format!("{}x{}", config.width, config.height))
                .arg("-i")
                .arg(format!("/dev/video{index}"));
        } else {
            // Non-device URIs (files, network streams) go straight to ffmpeg
            cmd.arg("-i").arg(&config.device);
        }

        cmd.arg("-vf")
            .arg(format!("scale={}:{}", config.width, config.height))
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| CaptureError::Open {
            device: config.device.clone(),
            message: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| CaptureError::Open {
            device: config.device.clone(),
            message: "failed to capture ffmpeg stdout".to_string(),
        })?;

        // Small queue so capture backpressures instead of buffering stale frames
        let (tx, rx) = bounded(2);
        let frame_bytes = config.width as usize * config.height as usize * 3;
        let reader = thread::spawn(move || read_loop(stdout, frame_bytes, tx));

        tracing::info!(
            "Capture started ({}, {}x{} @ {} fps, pid: {})",
            config.device,
            config.width,
            config.height,
            config.fps,
            child.id(),
        );

        Ok(Self {
            config: config.clone(),
            child: Some(child),
            frames: Some(rx),
            reader: Some(reader),
            next_seq: 0,
        })
    }
}

impl FrameSource for CameraSource {
    fn acquire(&mut self) -> Result<FrameGrab, CaptureError> {
        let rx = self
            .frames
            .as_ref()
            .ok_or_else(|| CaptureError::Disconnected("capture already closed".to_string()))?;

        match rx.recv_timeout(Duration::from_millis(self.config.acquire_timeout_ms)) {
            Ok(Ok(mut data)) => {
                if self.config.mirror {
                    mirror_rows(&mut data, self.config.width as usize, 3);
                }
                self.next_seq += 1;
                Ok(FrameGrab::Frame(Frame {
                    data,
                    width: self.config.width,
                    height: self.config.height,
                    format: PixelFormat::Rgb8,
                    seq: self.next_seq,
                    timestamp_ms: Utc::now().timestamp_millis(),
                }))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(FrameGrab::Unavailable),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Disconnected(
                "capture stream ended".to_string(),
            )),
        }
    }

    fn close(&mut self) {
        self.frames = None;
        if let Some(mut child) = self.child.take() {
            tracing::info!("Stopping capture (pid: {})", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader thread body: one `read_exact` per frame until EOF or pipe error.
fn read_loop(
    mut stdout: impl Read,
    frame_bytes: usize,
    tx: Sender<Result<Vec<u8>, CaptureError>>,
) {
    let mut buffer = vec![0u8; frame_bytes];
    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                if tx.send(Ok(buffer.clone())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(CaptureError::Disconnected(e.to_string())));
                break;
            }
        }
    }
}

/// Parse a `/dev/videoX` style device string, returning the index if present.
pub(crate) fn parse_device_index(device: &str) -> Option<u32> {
    if let Ok(index) = device.parse::<u32>() {
        return Some(index);
    }
    if let Some(stripped) = device.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse().ok();
        }
    }
    None
}

/// Reverse each pixel row in place (horizontal flip).
fn mirror_rows(data: &mut [u8], width: usize, bytes_per_pixel: usize) {
    let row_bytes = width * bytes_per_pixel;
    for row in data.chunks_exact_mut(row_bytes) {
        let mut left = 0;
        let mut right = width - 1;
        while left < right {
            for b in 0..bytes_per_pixel {
                row.swap(left * bytes_per_pixel + b, right * bytes_per_pixel + b);
            }
            left += 1;
            right -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_index() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("2"), Some(2));
        assert_eq!(parse_device_index("/dev/video0"), Some(0));
        assert_eq!(parse_device_index("/dev/video12"), Some(12));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("rtsp://cam.local/stream"), None);
        assert_eq!(parse_device_index("capture.mp4"), None);
    }

    #[test]
    fn test_mirror_rows_rgb() {
        // 3x2 image, each pixel a distinct value triplet
        #[rustfmt::skip]
        let mut data = vec![
            1, 1, 1,  2, 2, 2,  3, 3, 3,
            4, 4, 4,  5, 5, 5,  6, 6, 6,
        ];
        mirror_rows(&mut data, 3, 3);
        #[rustfmt::skip]
        let expected = vec![
            3, 3, 3,  2, 2, 2,  1, 1, 1,
            6, 6, 6,  5, 5, 5,  4, 4, 4,
        ];
        assert_eq!(data, expected);
    }

    #[test]
    fn test_mirror_rows_twice_is_identity() {
        let original: Vec<u8> = (0..4 * 2 * 3).map(|v| v as u8).collect();
        let mut data = original.clone();
        mirror_rows(&mut data, 4, 3);
        mirror_rows(&mut data, 4, 3);
        assert_eq!(data, original);
    }

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
    }
}
