//! Capture trait definitions
//!
//! Platform-agnostic view of media devices, live streams and chunked encoders.
//! A platform adapter implements [`CapturePlatform`]; everything above it
//! (catalog, prober, session controller, recorder) only talks to these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Kind of media input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Video,
    Audio,
}

/// Information about a media input device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Video or audio input
    pub kind: DeviceKind,

    /// Human readable label (may be empty before permission is granted)
    pub label: String,
}

impl DeviceInfo {
    pub fn video(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::Video,
            label: label.into(),
        }
    }

    pub fn audio(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::Audio,
            label: label.into(),
        }
    }
}

/// Video resolution, written as `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resolution '{0}', expected WIDTHxHEIGHT")]
pub struct ParseResolutionError(String);

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseResolutionError(s.to_string());
        let (width, height) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = ParseResolutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

/// Inclusive numeric range reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRange {
    pub min: f64,
    pub max: f64,
}

impl CapabilityRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Empty when `min > max`
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Capability ranges of a live video track, when the platform exposes them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackCapabilities {
    pub width: Option<CapabilityRange>,
    pub height: Option<CapabilityRange>,
    pub frame_rate: Option<CapabilityRange>,
}

/// Settings actually negotiated for a live track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSettings {
    pub device_id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
}

impl TrackSettings {
    pub fn resolution(&self) -> Option<Resolution> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(Resolution::new(width, height))
            }
            _ => None,
        }
    }

    pub fn rounded_frame_rate(&self) -> Option<u32> {
        self.frame_rate
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| fps.round() as u32)
    }
}

/// Audio processing switches; all off for capture-card audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioProcessing {
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
}

impl AudioProcessing {
    pub const fn disabled() -> Self {
        Self {
            echo_cancellation: false,
            auto_gain_control: false,
            noise_suppression: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    /// Exact device id
    pub device_id: String,
    pub ideal_resolution: Option<Resolution>,
    pub ideal_frame_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    /// Exact device id
    pub device_id: String,
    pub processing: Option<AudioProcessing>,
}

/// What to ask the platform for when acquiring a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConstraints {
    pub video: VideoConstraints,
    /// `None` acquires a video-only stream
    pub audio: Option<AudioConstraints>,
}

impl StreamConstraints {
    /// Ideal resolution/framerate, exact ids, audio processing disabled
    pub fn full(
        video_device_id: &str,
        audio_device_id: &str,
        resolution: Resolution,
        frame_rate: u32,
    ) -> Self {
        Self {
            video: VideoConstraints {
                device_id: video_device_id.to_string(),
                ideal_resolution: Some(resolution),
                ideal_frame_rate: Some(frame_rate),
            },
            audio: Some(AudioConstraints {
                device_id: audio_device_id.to_string(),
                processing: Some(AudioProcessing::disabled()),
            }),
        }
    }

    /// Device ids only
    pub fn minimal(video_device_id: &str, audio_device_id: &str) -> Self {
        Self {
            video: VideoConstraints {
                device_id: video_device_id.to_string(),
                ideal_resolution: None,
                ideal_frame_rate: None,
            },
            audio: Some(AudioConstraints {
                device_id: audio_device_id.to_string(),
                processing: None,
            }),
        }
    }

    /// Video-only test stream used by capability probing
    pub fn probe(video_device_id: &str) -> Self {
        Self {
            video: VideoConstraints {
                device_id: video_device_id.to_string(),
                ideal_resolution: None,
                ideal_frame_rate: None,
            },
            audio: None,
        }
    }

    pub fn has_hints(&self) -> bool {
        self.video.ideal_resolution.is_some()
            || self.video.ideal_frame_rate.is_some()
            || self.audio.as_ref().is_some_and(|a| a.processing.is_some())
    }
}

/// A decoded video frame, tightly packed RGB8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Structured failure category reported by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformErrorKind {
    /// Device held by another handle or application
    Busy,
    /// Device vanished or never existed
    NotFound,
    /// Constraints could not be satisfied
    Overconstrained,
    PermissionDenied,
    /// Operation not offered by this platform
    Unsupported,
    /// Anything else; classified from the message text
    Other,
}

/// Error reported by a capture platform adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Busy, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::NotFound, message)
    }

    pub fn overconstrained(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Overconstrained, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Other, message)
    }
}

/// Producer side of the ordered chunk queue
pub type ChunkSender = mpsc::UnboundedSender<Vec<u8>>;

/// Consumer side of the ordered chunk queue
pub type ChunkReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Encoder settings negotiated once per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
    pub mime_type: String,
    pub video_bits_per_second: u64,
}

/// Chunked encoder attached to a live stream
pub trait ChunkEncoder: Send {
    /// Container/codec type of the emitted chunks
    fn mime_type(&self) -> &str;

    /// Begin emitting a chunk into `sink` every `timeslice` of capture
    fn start(&mut self, timeslice: Duration, sink: ChunkSender) -> Result<(), PlatformError>;

    /// Flush the final partial chunk into the sink and stop emitting
    fn stop(&mut self) -> Result<(), PlatformError>;

    fn is_recording(&self) -> bool;
}

/// A live acquisition holding device handles until released
pub trait MediaStream: Send {
    fn video_settings(&self) -> TrackSettings;

    /// `None` when the platform cannot report ranges
    fn video_capabilities(&self) -> Option<TrackCapabilities>;

    /// `None` for video-only streams
    fn audio_settings(&self) -> Option<TrackSettings>;

    fn create_encoder(&mut self, config: &EncoderConfig)
        -> Result<Box<dyn ChunkEncoder>, PlatformError>;

    /// Latest decoded video frame
    fn grab_frame(&self) -> Result<Frame, PlatformError>;

    /// Stop every track; must be idempotent
    fn release(&mut self);
}

/// Device enumeration and stream acquisition for one host
#[async_trait]
pub trait CapturePlatform: Send + Sync {
    /// Adapter name for logs
    fn name(&self) -> &str;

    /// Unlock device labels; most adapters have nothing to do
    async fn request_permission(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, PlatformError>;

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn MediaStream>, PlatformError>;

    fn is_type_supported(&self, mime_type: &str) -> bool;
}
