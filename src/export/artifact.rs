//! Artifact delivery
//!
//! Finished recordings and screenshots are handed to an [`ArtifactSink`] under
//! their final file name.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Delivery errors
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("Refusing to deliver empty artifact {0}")]
    Empty(String),
}

/// Receipt for a delivered artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredArtifact {
    pub name: String,
    pub mime_type: String,
    /// Where the bytes ended up
    pub location: String,
    pub bytes: usize,
}

/// Receives finished artifacts
pub trait ArtifactSink: Send + Sync {
    fn deliver(
        &self,
        name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<DeliveredArtifact, ArtifactError>;
}

fn validate(name: &str, data: &[u8]) -> Result<(), ArtifactError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\']);
    if !plain {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    if data.is_empty() {
        return Err(ArtifactError::Empty(name.to_string()));
    }
    Ok(())
}

/// Writes artifacts into a directory, creating it on first delivery
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSink for DirectorySink {
    fn deliver(
        &self,
        name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<DeliveredArtifact, ArtifactError> {
        validate(name, data)?;

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        let path = self.dir.join(name);
        fs::write(&path, data)?;

        tracing::info!("Saved {} ({} bytes) to {:?}", name, data.len(), path);

        Ok(DeliveredArtifact {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            location: path.display().to_string(),
            bytes: data.len(),
        })
    }
}

/// Keeps delivered artifacts in memory
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<(DeliveredArtifact, Vec<u8>)>>,
}

impl MemorySink {
    pub fn delivered(&self) -> Vec<DeliveredArtifact> {
        self.delivered.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn data(&self, name: &str) -> Option<Vec<u8>> {
        self.delivered
            .lock()
            .iter()
            .find(|(a, _)| a.name == name)
            .map(|(_, data)| data.clone())
    }
}

impl ArtifactSink for MemorySink {
    fn deliver(
        &self,
        name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<DeliveredArtifact, ArtifactError> {
        validate(name, data)?;
        let artifact = DeliveredArtifact {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            location: format!("memory:{}", name),
            bytes: data.len(),
        };
        self.delivered.lock().push((artifact.clone(), data.to_vec()));
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_directory_sink_writes_file() {
        let dir = tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out"));

        let receipt = sink
            .deliver("recording_1.webm", "video/webm", &[1, 2, 3])
            .unwrap();
        assert_eq!(receipt.bytes, 3);
        assert_eq!(
            fs::read(dir.path().join("out").join("recording_1.webm")).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_rejects_paths_and_empty_data() {
        let sink = MemorySink::default();
        assert!(matches!(
            sink.deliver("../escape.webm", "video/webm", &[1]),
            Err(ArtifactError::InvalidName(_))
        ));
        assert!(matches!(
            sink.deliver("recording_1.webm", "video/webm", &[]),
            Err(ArtifactError::Empty(_))
        ));
        assert!(sink.delivered().is_empty());
    }
}
