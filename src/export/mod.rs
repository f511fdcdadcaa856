//! Artifact export
//!
//! Delivery of finished recordings and PNG screenshots.

pub mod artifact;
pub mod screenshot;

pub use artifact::{ArtifactError, ArtifactSink, DeliveredArtifact, DirectorySink, MemorySink};
pub use screenshot::{encode_png, screenshot_file_name, ScreenshotError};
