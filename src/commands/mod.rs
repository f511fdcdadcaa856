//! Presenter-facing command handlers
//!
//! Actions a presenter can invoke on the capture station and the view model it
//! renders from.

pub mod console;
pub mod station;
pub mod view;

pub use station::{CaptureStation, RecordingToggle, StationEvent, StatusLevel};
pub use view::{SessionInfo, StationView};
