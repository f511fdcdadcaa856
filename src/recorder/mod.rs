//! Recording system module
//!
//! - RecordingEngine accumulating encoder chunks for the live session
//! - Encoder negotiation (container/codec, bitrate, chunk interval)
//! - EBML reading/writing and the WebM duration fix applied on stop

pub mod duration;
pub mod ebml;
pub mod encoder;
pub mod engine;
pub mod state;

pub use duration::{DurationFixError, DurationFixer, WebmDurationFixer};
pub use engine::{RecordingEngine, RecordingEvent};
pub use state::{RecordingArtifact, RecordingState, RecordingStatus};
