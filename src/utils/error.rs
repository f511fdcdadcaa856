//! Error types and handling
//!
//! Common error types used across the capture station.

use crate::capture::traits::PlatformError;
use crate::recorder::duration::DurationFixError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Station-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No device found: {0}")]
    NoDeviceFound(String),

    #[error("Device not found or disconnected: {0}")]
    DeviceNotFound(String),

    #[error("Device is in use by another application: {0}")]
    DeviceInUse(String),

    /// Only ever logged; triggers the minimal-constraint retry.
    #[error("Unsupported constraint: {0}")]
    UnsupportedConstraint(String),

    #[error("Media recorder not initialized")]
    RecorderUninitialized,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Could not fix recording duration: {0}")]
    DurationFixFailed(#[from] DurationFixError),

    /// Acquisition failure that matched no known kind, passed through as reported.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Settings error: {0}")]
    Settings(#[from] crate::settings::SettingsError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::export::artifact::ArtifactError),

    #[error("Screenshot error: {0}")]
    Screenshot(String),
}

/// Error response for the presenter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CaptureError> for ErrorResponse {
    fn from(error: &CaptureError) -> Self {
        let code = match error {
            CaptureError::NoDeviceFound(_) => "NO_DEVICE_FOUND",
            CaptureError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            CaptureError::DeviceInUse(_) => "DEVICE_IN_USE",
            CaptureError::UnsupportedConstraint(_) => "UNSUPPORTED_CONSTRAINT",
            CaptureError::RecorderUninitialized => "RECORDER_UNINITIALIZED",
            CaptureError::InvalidState(_) => "INVALID_STATE",
            CaptureError::DurationFixFailed(_) => "DURATION_FIX_FAILED",
            CaptureError::Platform(_) => "PLATFORM_ERROR",
            CaptureError::Settings(_) => "SETTINGS_ERROR",
            CaptureError::Delivery(_) => "DELIVERY_ERROR",
            CaptureError::Screenshot(_) => "SCREENSHOT_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<CaptureError> for ErrorResponse {
    fn from(error: CaptureError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;
