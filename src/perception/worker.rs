//! Perception worker subprocess
//!
//! Launches the Python worker script as a child process and exchanges framed
//! packets with it over stdin/stdout: each side writes a 4-byte big-endian
//! length followed by that many bytes. A request is a JSON header plane plus a
//! raw pixel plane; a response is a JSON result plane plus, in segmentation
//! mode, a raw mask plane (one confidence byte per pixel).
//!
//! A dedicated thread parses responses off the child's stdout into a channel
//! so `infer` can wait with a deadline; responses for frames that already
//! timed out are matched by sequence number and discarded.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::capture::{Frame, PixelFormat};
use crate::config::{PerceptionConfig, PerceptionMode};
use crate::error::PerceptionError;
use crate::perception::{
    Landmark, LandmarkSet, PerceptionResult, Perceptor, SegmentationMask, POSE_LANDMARK_COUNT,
};

/// Request header sent to the worker ahead of the pixel plane
#[derive(Debug, Serialize)]
struct RequestHeader<'a> {
    seq: u64,
    width: u32,
    height: u32,
    format: &'a str,
    mode: &'a str,
}

/// Result header read back from the worker
#[derive(Debug, Deserialize)]
struct ResponseHeader {
    seq: u64,
    detected: bool,
    #[serde(default)]
    landmarks: Vec<[f32; 3]>,
    #[serde(default)]
    has_mask: bool,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

/// One fully parsed worker response
#[derive(Debug)]
struct WorkerReply {
    seq: u64,
    result: PerceptionResult,
}

/// Managed perception worker subprocess
pub struct PerceptionWorker {
    config: PerceptionConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    replies: Option<Receiver<Result<WorkerReply, PerceptionError>>>,
    reader: Option<JoinHandle<()>>,
}

impl PerceptionWorker {
    /// Launch the worker subprocess and start the response reader.
    pub fn launch(config: &PerceptionConfig) -> Result<Self, PerceptionError> {
        let mut child = Command::new(&config.python)
            .arg(&config.worker_script)
            .args(["--mode", config.mode.as_str()])
            .args(["--model-dir", &config.model_dir])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PerceptionError::Launch {
                script: config.worker_script.clone(),
                message: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| PerceptionError::Launch {
            script: config.worker_script.clone(),
            message: "failed to open worker stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PerceptionError::Launch {
            script: config.worker_script.clone(),
            message: "failed to open worker stdout".to_string(),
        })?;

        let (tx, rx) = unbounded();
        let mode = config.mode;
        let reader = thread::spawn(move || reply_loop(stdout, mode, tx));

        tracing::info!(
            "Perception worker started (pid: {}, mode: {}, script: {})",
            child.id(),
            config.mode.as_str(),
            config.worker_script,
        );

        Ok(Self {
            config: config.clone(),
            child: Some(child),
            stdin: Some(stdin),
            replies: Some(rx),
            reader: Some(reader),
        })
    }

    /// Check if the worker process is still alive (non-blocking)
    fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    tracing::warn!("Perception worker exited with: {}", status);
                    self.child = None;
                    false
                }
                Err(e) => {
                    tracing::error!("Failed to check worker status: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    fn write_request(&mut self, frame: &Frame) -> Result<(), PerceptionError> {
        let header = RequestHeader {
            seq: frame.seq,
            width: frame.width,
            height: frame.height,
            format: match frame.format {
                PixelFormat::Rgb8 => "rgb8",
                PixelFormat::Rgba8 => "rgba8",
            },
            mode: self.config.mode.as_str(),
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| PerceptionError::Protocol(format!("header encode: {}", e)))?;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PerceptionError::WorkerExited("stdin closed".to_string()))?;

        write_request_planes(stdin, &header_bytes, &frame.data)
            .map_err(|e| PerceptionError::WorkerExited(format!("request write failed: {}", e)))
    }
}

impl Perceptor for PerceptionWorker {
    fn infer(&mut self, frame: &Frame) -> Result<PerceptionResult, PerceptionError> {
        if !self.is_running() {
            return Err(PerceptionError::WorkerExited(
                "worker process is not running".to_string(),
            ));
        }

        self.write_request(frame)?;

        let replies = self
            .replies
            .as_ref()
            .ok_or_else(|| PerceptionError::WorkerExited("reader closed".to_string()))?;

        let deadline = Instant::now() + Duration::from_millis(self.config.infer_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match replies.recv_timeout(remaining) {
                Ok(Ok(reply)) if reply.seq == frame.seq => return Ok(reply.result),
                Ok(Ok(reply)) => {
                    // Late answer for a frame that already timed out
                    tracing::debug!(
                        "Discarding stale worker reply (seq {}, waiting for {})",
                        reply.seq,
                        frame.seq
                    );
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PerceptionError::Timeout(self.config.infer_timeout_ms));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PerceptionError::WorkerExited(
                        "worker output stream ended".to_string(),
                    ));
                }
            }
        }
    }

    fn close(&mut self) {
        // Closing stdin signals the worker to exit on its own
        self.stdin = None;
        self.replies = None;
        if let Some(mut child) = self.child.take() {
            tracing::info!("Stopping perception worker (pid: {})", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for PerceptionWorker {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader thread body: parse framed responses until EOF or a wire fault.
fn reply_loop(
    mut stdout: impl Read,
    mode: PerceptionMode,
    tx: Sender<Result<WorkerReply, PerceptionError>>,
) {
    loop {
        match read_reply(&mut stdout, mode) {
            Ok(Some(reply)) => {
                if tx.send(Ok(reply)).is_err() {
                    break;
                }
            }
            Ok(None) => break, // clean EOF
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

/// Read one complete response (header plane + optional mask plane).
/// Returns `Ok(None)` on clean EOF at a message boundary.
fn read_reply(
    stdout: &mut impl Read,
    mode: PerceptionMode,
) -> Result<Option<WorkerReply>, PerceptionError> {
    let header_bytes = match read_plane(stdout)? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    let header: ResponseHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| PerceptionError::Protocol(format!("response parse error: {}", e)))?;

    let result = parse_result(stdout, mode, &header)?;
    Ok(Some(WorkerReply {
        seq: header.seq,
        result,
    }))
}

fn parse_result(
    stdout: &mut impl Read,
    mode: PerceptionMode,
    header: &ResponseHeader,
) -> Result<PerceptionResult, PerceptionError> {
    if !header.detected {
        return Ok(PerceptionResult::Empty);
    }

    match mode {
        PerceptionMode::Landmarks => {
            if header.landmarks.len() != POSE_LANDMARK_COUNT {
                return Err(PerceptionError::Protocol(format!(
                    "expected {} landmarks, got {}",
                    POSE_LANDMARK_COUNT,
                    header.landmarks.len()
                )));
            }
            let points = header
                .landmarks
                .iter()
                .map(|&[x, y, z]| Landmark { x, y, z })
                .collect();
            Ok(PerceptionResult::Landmarks(LandmarkSet::new(points)))
        }
        PerceptionMode::Segmentation => {
            if !header.has_mask {
                return Err(PerceptionError::Protocol(
                    "detected segmentation result without mask plane".to_string(),
                ));
            }
            let mask_bytes = read_plane(stdout)?.ok_or_else(|| {
                PerceptionError::Protocol("worker stream ended mid-response".to_string())
            })?;
            let expected = header.width as usize * header.height as usize;
            if mask_bytes.len() != expected {
                return Err(PerceptionError::Protocol(format!(
                    "mask plane is {} bytes, expected {} ({}x{})",
                    mask_bytes.len(),
                    expected,
                    header.width,
                    header.height
                )));
            }
            let confidence = mask_bytes.iter().map(|&b| b as f32 / 255.0).collect();
            Ok(PerceptionResult::Mask(SegmentationMask {
                confidence,
                width: header.width,
                height: header.height,
            }))
        }
    }
}

fn write_request_planes(w: &mut impl Write, header: &[u8], pixels: &[u8]) -> std::io::Result<()> {
    write_plane(w, header)?;
    write_plane(w, pixels)?;
    w.flush()
}

/// Write one length-prefixed plane
fn write_plane(w: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "plane exceeds u32 length")
    })?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(bytes)
}

/// Read one length-prefixed plane; `Ok(None)` on EOF before the prefix
fn read_plane(r: &mut impl Read) -> Result<Option<Vec<u8>>, PerceptionError> {
    let mut prefix = [0u8; 4];
    match r.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(PerceptionError::WorkerExited(format!(
                "response read failed: {}",
                e
            )));
        }
    }
    let len = u32::from_be_bytes(prefix) as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)
        .map_err(|e| PerceptionError::Protocol(format!("truncated plane: {}", e)))?;
    Ok(Some(bytes))
}
