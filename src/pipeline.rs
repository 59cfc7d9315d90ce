//! Pipeline driver
//!
//! The single control loop: acquire a frame, run perception, build and encode
//! the payload, send it. One frame is fully processed before the next
//! acquisition; nothing spans iterations except the connection and the device
//! handle. The stop signal is checked only at iteration boundaries, so an
//! in-flight frame always completes or is dropped whole; partial data is
//! never sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::capture::{Frame, FrameGrab, FrameSource};
use crate::config::PngCompression;
use crate::encode::encode_payload;
use crate::error::{PerceptionError, PipelineError, Result, TransportError};
use crate::payload::PayloadBuilder;
use crate::perception::{PerceptionResult, Perceptor};
use crate::transport::Transport;

/// Frames between capture heartbeat log lines
const HEARTBEAT_INTERVAL: u64 = 30;

/// Driver lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Failed,
    Stopped,
}

/// Per-run counters, reported at shutdown
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub frames_sent: u64,
    pub frames_skipped: u64,
}

/// The capture → perception → encode → transport control loop
pub struct Pipeline<S, P, T> {
    source: S,
    perceptor: P,
    transport: T,
    builder: PayloadBuilder,
    compression: PngCompression,
    shutdown: Arc<AtomicBool>,
    state: PipelineState,
    stats: PipelineStats,
    last_seq: u64,
}

impl<S, P, T> Pipeline<S, P, T>
where
    S: FrameSource,
    P: Perceptor,
    T: Transport,
{
    pub fn new(
        source: S,
        perceptor: P,
        transport: T,
        builder: PayloadBuilder,
        compression: PngCompression,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            perceptor,
            transport,
            builder,
            compression,
            shutdown,
            state: PipelineState::Idle,
            stats: PipelineStats::default(),
            last_seq: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Run until the stop signal fires or a structural fault ends the run.
    /// Component handles are released exactly once on every exit path.
    pub fn run(&mut self) -> Result<()> {
        let outcome = self.run_loop();

        self.source.close();
        self.perceptor.close();
        self.transport.close();
        self.state = PipelineState::Stopped;

        tracing::info!(
            "Pipeline stopped (sent: {}, skipped: {})",
            self.stats.frames_sent,
            self.stats.frames_skipped,
        );
        outcome
    }

    fn run_loop(&mut self) -> Result<()> {
        self.transport.connect().map_err(|e| {
            self.state = PipelineState::Failed;
            PipelineError::stage("connect", 0, e)
        })?;

        self.state = PipelineState::Running;
        tracing::info!("Pipeline running");

        let mut smoothed_fps: f32 = 0.0;
        let mut last_instant = Instant::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                self.state = PipelineState::Draining;
                tracing::info!("Stop requested, draining");
                return Ok(());
            }

            let frame = match self.source.acquire() {
                Ok(FrameGrab::Frame(frame)) => frame,
                Ok(FrameGrab::Unavailable) => {
                    tracing::trace!("No frame within the acquire window, retrying");
                    continue;
                }
                Err(e) => {
                    self.state = PipelineState::Failed;
                    return Err(PipelineError::stage("capture", self.last_seq, e).into());
                }
            };
            self.last_seq = frame.seq;

            let now = Instant::now();
            let elapsed = now.duration_since(last_instant).as_secs_f32();
            last_instant = now;
            if elapsed > 0.0 {
                let instant = 1.0 / elapsed;
                smoothed_fps = if smoothed_fps == 0.0 {
                    instant
                } else {
                    0.9 * smoothed_fps + 0.1 * instant
                };
            }
            if frame.seq % HEARTBEAT_INTERVAL == 0 {
                tracing::debug!(
                    "Capture heartbeat: frame #{}, {:.1} fps",
                    frame.seq,
                    smoothed_fps
                );
            }

            let result = match self.infer_with_retry(&frame) {
                Ok(Some(result)) => result,
                Ok(None) => {
                    // Repeated timeout: drop this frame, keep the run alive
                    self.stats.frames_skipped += 1;
                    continue;
                }
                Err(e) => {
                    self.state = PipelineState::Failed;
                    return Err(PipelineError::stage("perception", frame.seq, e).into());
                }
            };

            let payload = match self.builder.build(&frame, &result) {
                Some(payload) => payload,
                None => {
                    self.stats.frames_skipped += 1;
                    continue;
                }
            };

            let bytes = encode_payload(&payload, self.compression).map_err(|e| {
                self.state = PipelineState::Failed;
                PipelineError::stage("encode", frame.seq, e)
            })?;

            if let Err(e) = self.send_with_reconnect(&bytes) {
                self.state = PipelineState::Failed;
                return Err(PipelineError::stage("transport", frame.seq, e).into());
            }
            self.stats.frames_sent += 1;
        }
    }

    /// Run inference with the bounded retry policy: one extra attempt on
    /// timeout, then give up on this frame. Any other fault is structural.
    fn infer_with_retry(&mut self, frame: &Frame) -> std::result::Result<Option<PerceptionResult>, PerceptionError> {
        match self.perceptor.infer(frame) {
            Ok(result) => Ok(Some(result)),
            Err(PerceptionError::Timeout(ms)) => {
                tracing::warn!("Inference timed out at frame #{} ({} ms), retrying once", frame.seq, ms);
                match self.perceptor.infer(frame) {
                    Ok(result) => Ok(Some(result)),
                    Err(PerceptionError::Timeout(_)) => {
                        tracing::warn!("Inference timed out again, skipping frame #{}", frame.seq);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Send with the bounded reconnect policy: on failure, reconnect once and
    /// resend once; a second consecutive failure is fatal for the run.
    fn send_with_reconnect(&mut self, bytes: &[u8]) -> std::result::Result<(), TransportError> {
        match self.transport.send(bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Send failed ({}), reconnecting once", e);
                self.transport.close();
                self.transport.connect()?;
                self.transport.send(bytes)
            }
        }
    }
}
