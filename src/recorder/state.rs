//! Recording state management
//!
//! Defines the recording state machine and the finished artifact.

use super::duration::DurationFixError;
use super::encoder::container_extension;
use serde::{Deserialize, Serialize};

/// Current state of the recording engine
///
/// Only `Idle → Recording → Idle` transitions exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Collecting encoder chunks
    Recording,
}

/// A finished recording held in memory
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    /// Concatenated chunks, duration-corrected when possible
    pub data: Vec<u8>,

    /// Container/codec type negotiated with the encoder
    pub mime_type: String,

    /// Wall-clock time between start and stop
    pub duration_ms: u64,

    /// Number of chunks that made up the recording
    pub chunk_count: usize,

    /// Set when the duration could not be written; `data` is then uncorrected
    pub duration_fix_error: Option<DurationFixError>,
}

impl RecordingArtifact {
    pub fn duration_fixed(&self) -> bool {
        self.duration_fix_error.is_none()
    }

    pub fn extension(&self) -> &'static str {
        container_extension(&self.mime_type)
    }

    /// `recording_<epoch-millis>.<ext>`
    pub fn file_name(&self, epoch_ms: u64) -> String {
        format!("recording_{}.{}", epoch_ms, self.extension())
    }
}

/// Progress snapshot for the presenter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub duration_ms: u64,
    pub chunk_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_file_name_follows_container() {
        let mut artifact = RecordingArtifact {
            data: vec![1],
            mime_type: "video/webm;codecs=vp9,opus".to_string(),
            duration_ms: 1_000,
            chunk_count: 1,
            duration_fix_error: None,
        };
        assert_eq!(artifact.file_name(1_700_000_000_000), "recording_1700000000000.webm");

        artifact.mime_type = "video/mp4".to_string();
        assert_eq!(artifact.file_name(42), "recording_42.mp4");
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RecordingState::Recording).unwrap(), "\"recording\"");
        assert_eq!(RecordingState::default(), RecordingState::Idle);
    }
}
