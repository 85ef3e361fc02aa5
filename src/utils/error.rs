//! Error types and handling
//!
//! Error taxonomy shared by the capture, recording and pipeline layers.
//! None of these abort the process: device faults are recorded on the
//! owning session, encoder faults end one recording, and everything else
//! surfaces through return values and events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hardware or driver level failure reported by a camera backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("acquisition failed: {0}")]
    Acquisition(String),

    #[error("parameter access failed: {0}")]
    Parameter(String),

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device error: {0}")]
    Other(String),
}

/// Requested settings fall outside what the device supports
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("resolution {width}x{height} exceeds device maximum {max_width}x{max_height}")]
    ResolutionTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("resolution must be non-zero")]
    EmptyResolution,

    #[error("frame rate {0} is not a finite positive number")]
    InvalidFrameRate(f64),

    #[error("device is not in a configurable state ({0})")]
    WrongState(String),
}

/// Failure to open or write a video container
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open encoder for {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("frame is {actual_width}x{actual_height}, encoder expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("encoder already closed")]
    Closed,

    #[error("encoder error: {0}")]
    Write(String),
}

/// Crate-level error type for operations that report through `Result`
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Error response for display/control collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Device(_) => "DEVICE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Encoder(_) => "ENCODER_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Snapshot(_) => "SNAPSHOT_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response: ErrorResponse =
            AppError::Device(DeviceError::Init("no link".to_string())).into();
        assert_eq!(response.code, "DEVICE_ERROR");
        assert!(response.message.contains("no link"));

        let response: ErrorResponse = AppError::Configuration(ConfigurationError::ResolutionTooLarge {
            width: 4000,
            height: 3000,
            max_width: 1920,
            max_height: 1080,
        })
        .into();
        assert_eq!(response.code, "CONFIGURATION_ERROR");
        assert!(response.message.contains("4000x3000"));
    }
}
