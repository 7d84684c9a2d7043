//! Error types for the GhostBox display client.
//!
//! This module defines custom error enums for each component of the client,
//! providing descriptive error messages with context information.

use crate::remote::FieldError;
use thiserror::Error;

/// Sticky headline shown when the device cannot be reached.
pub const COMMUNICATION_FAILED: &str = "ERROR: Server communication failed";

/// Sticky headline shown when re-fetching the options failed.
pub const REVERT_FAILED: &str = "ERROR: Failed to revert options";

/// Errors talking to the device over HTTP.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to '{path}' failed: {source}")]
    Request {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to '{path}' returned HTTP {code}")]
    Status { path: &'static str, code: u16 },

    #[error("Invalid JSON from '{path}': {source}")]
    Decode {
        path: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from submitting the options.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Device rejected {} option(s)", .0.len())]
    Rejected(Vec<FieldError>),

    #[error(transparent)]
    Refused(#[from] SyncError),
}

impl SubmitError {
    /// Headline message for the display.
    ///
    /// A rejection shows its first field message, or nothing when the device
    /// sent an empty list. A submit refused locally never reached the device.
    pub fn headline(&self) -> Option<String> {
        match self {
            SubmitError::Transport(_) => Some(COMMUNICATION_FAILED.to_string()),
            SubmitError::Rejected(errors) => errors.first().map(|e| e.message.clone()),
            SubmitError::Refused(_) => None,
        }
    }
}

/// Local edits the options model refuses.
#[derive(Error, Debug, PartialEq)]
pub enum SyncError {
    #[error("Unknown option '{0}'")]
    UnknownField(String),

    #[error("Option '{0}' is not a switch")]
    NotToggle(String),

    #[error("Options are locked until the device responds")]
    NotInteractive,
}

/// Errors related to the client settings file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse settings: {0}")]
    ParseError(String),

    #[error("Settings validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write settings: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Errors presenting a composed frame.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Frame buffer does not match {width}x{height}")]
    BadDimensions { width: u32, height: u32 },

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Failed to write frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to the control socket.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Failed to bind socket at '{path}': {source}")]
    SocketBindFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session is no longer running")]
    SessionClosed,

    #[error("Failed to serialize response: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Top-level client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control socket error: {0}")]
    Control(#[from] ControlError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_headline_uses_first_message() {
        let err = SubmitError::Rejected(vec![
            FieldError {
                camel_key: "minFrequency".to_string(),
                message: "must be less than maxFrequency".to_string(),
            },
            FieldError {
                camel_key: "sleepTime".to_string(),
                message: "must be positive".to_string(),
            },
        ]);
        assert_eq!(
            err.headline().as_deref(),
            Some("must be less than maxFrequency")
        );
        assert_eq!(err.to_string(), "Device rejected 2 option(s)");
    }

    #[test]
    fn test_empty_rejection_has_no_headline() {
        assert_eq!(SubmitError::Rejected(Vec::new()).headline(), None);
    }

    #[test]
    fn test_refused_submit_has_no_headline() {
        let err = SubmitError::from(SyncError::NotInteractive);
        assert_eq!(err.headline(), None);
        assert_eq!(err.to_string(), "Options are locked until the device responds");
    }

    #[test]
    fn test_transport_headline() {
        let err = SubmitError::from(TransportError::Status {
            path: "/options",
            code: 502,
        });
        assert_eq!(err.headline().as_deref(), Some(COMMUNICATION_FAILED));
        assert_eq!(err.to_string(), "Request to '/options' returned HTTP 502");
    }
}
