//! Recording engine
//!
//! Collects encoder chunks from the live session and, on stop, assembles them
//! into one duration-corrected artifact.

use super::duration::{DurationFixer, WebmDurationFixer};
use super::encoder::DEFAULT_CHUNK_INTERVAL;
use super::state::{RecordingArtifact, RecordingState, RecordingStatus};
use crate::capture::traits::ChunkReceiver;
use crate::session::Session;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::error::{CaptureError, CaptureResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recording started
    Started,
    /// Recording stopped; artifact assembled
    Stopped { duration_ms: u64, bytes: usize },
    /// Artifact delivered without a corrected duration
    DurationFixFailed(String),
}

/// Chunk accumulator and `Idle ⇄ Recording` state machine
pub struct RecordingEngine {
    /// Current recording state
    state: RecordingState,

    /// Chunks in arrival order, all non-empty
    chunks: Vec<Vec<u8>>,

    /// Epoch millis captured at start
    start_ms: Option<u64>,

    /// Ordered queue the encoder pushes into
    queue: Option<ChunkReceiver>,

    /// Container type of the running encoder
    mime_type: String,

    chunk_interval: Duration,

    clock: Arc<dyn Clock>,

    fixer: Box<dyn DurationFixer>,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::with_parts(
            DEFAULT_CHUNK_INTERVAL,
            Arc::new(SystemClock),
            Box::new(WebmDurationFixer),
        )
    }

    pub fn with_parts(
        chunk_interval: Duration,
        clock: Arc<dyn Clock>,
        fixer: Box<dyn DurationFixer>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            state: RecordingState::Idle,
            chunks: Vec::new(),
            start_ms: None,
            queue: None,
            mime_type: String::new(),
            chunk_interval,
            clock,
            fixer,
            event_tx,
        }
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Elapsed milliseconds of the running recording, 0 when idle
    pub fn duration_ms(&self) -> u64 {
        match (self.state, self.start_ms) {
            (RecordingState::Recording, Some(start)) => self.clock.now_ms().saturating_sub(start),
            _ => 0,
        }
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            state: self.state,
            duration_ms: self.duration_ms(),
            chunk_count: self.chunks.len(),
        }
    }

    /// Start recording the session's encoder output
    pub fn start(&mut self, session: Option<&mut Session>) -> CaptureResult<()> {
        if self.state != RecordingState::Idle {
            return Err(CaptureError::InvalidState(
                "Recording already in progress".to_string(),
            ));
        }

        let encoder = session
            .and_then(|session| session.encoder_mut())
            .ok_or(CaptureError::RecorderUninitialized)?;

        // late chunks from an earlier recording must not leak in
        self.chunks.clear();
        let (tx, rx) = mpsc::unbounded_channel();
        encoder.start(self.chunk_interval, tx)?;

        self.queue = Some(rx);
        self.mime_type = encoder.mime_type().to_string();
        self.start_ms = Some(self.clock.now_ms());
        self.state = RecordingState::Recording;
        let _ = self.event_tx.send(RecordingEvent::Started);

        tracing::info!(
            "Recording started ({}, {}ms chunks)",
            self.mime_type,
            self.chunk_interval.as_millis()
        );
        Ok(())
    }

    /// Append one encoder chunk; ignored while idle or when empty
    pub fn on_chunk(&mut self, data: Vec<u8>) {
        if self.state != RecordingState::Recording {
            tracing::debug!("Dropping {} byte chunk received while idle", data.len());
            return;
        }
        if data.is_empty() {
            return;
        }
        self.chunks.push(data);
    }

    /// Move everything queued so far into the chunk list, keeping order
    pub fn drain(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(queue) = self.queue.as_mut() {
            while let Ok(chunk) = queue.try_recv() {
                pending.push(chunk);
            }
        }
        let count = pending.len();
        for chunk in pending {
            self.on_chunk(chunk);
        }
        count
    }

    /// Stop recording and assemble the artifact
    ///
    /// While idle this only logs a warning and returns `None`.
    pub fn stop(&mut self, session: Option<&mut Session>) -> Option<RecordingArtifact> {
        if self.state != RecordingState::Recording {
            let err = CaptureError::InvalidState(
                "Cannot stop recording - not currently recording".to_string(),
            );
            tracing::warn!("{}", err);
            return None;
        }

        if let Some(encoder) = session.and_then(|session| session.encoder_mut()) {
            if let Err(e) = encoder.stop() {
                tracing::warn!("Encoder did not stop cleanly: {}", e);
            }
        }
        self.drain();

        let start = self.start_ms.take().unwrap_or_else(|| self.clock.now_ms());
        let duration_ms = self.clock.now_ms().saturating_sub(start);
        let chunks = std::mem::take(&mut self.chunks);
        let chunk_count = chunks.len();
        let buffer = chunks.concat();
        let mime_type = if self.mime_type.is_empty() {
            "video/webm".to_string()
        } else {
            std::mem::take(&mut self.mime_type)
        };

        self.queue = None;
        self.state = RecordingState::Idle;

        let artifact = match self.fixer.fix(&buffer, &mime_type, duration_ms) {
            Ok(fixed) => RecordingArtifact {
                data: fixed,
                mime_type,
                duration_ms,
                chunk_count,
                duration_fix_error: None,
            },
            Err(e) => {
                tracing::warn!("Could not fix recording duration: {}", e);
                let _ = self
                    .event_tx
                    .send(RecordingEvent::DurationFixFailed(e.to_string()));
                RecordingArtifact {
                    data: buffer,
                    mime_type,
                    duration_ms,
                    chunk_count,
                    duration_fix_error: Some(e),
                }
            }
        };

        let _ = self.event_tx.send(RecordingEvent::Stopped {
            duration_ms,
            bytes: artifact.data.len(),
        });

        tracing::info!(
            "Recording stopped. Duration: {}ms, {} chunks, {} bytes",
            duration_ms,
            chunk_count,
            artifact.data.len()
        );
        Some(artifact)
    }
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}
