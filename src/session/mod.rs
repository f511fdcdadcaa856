//! Capture session management
//!
//! - Preferences: the persisted device/format choice
//! - Session: the single live acquisition
//! - SessionController: negotiation, fallback and restart

pub mod controller;
pub mod preferences;

pub use controller::{classify_acquisition_error, AudioOption, Session, SessionController};
pub use preferences::Preferences;
