//! Error types shared across Duocast crates.

use std::fmt;

/// Why a capture device could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionFailure {
    /// The user (or OS prompt) refused access.
    PermissionDenied,
    /// An administrative or platform policy blocks the device.
    PolicyBlocked,
    /// No device matches the requested identifier.
    DeviceNotFound,
    /// The device exists but is held by someone else or failed to open.
    DeviceUnavailable,
}

impl fmt::Display for AcquisitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PermissionDenied => "permission denied",
            Self::PolicyBlocked => "blocked by policy",
            Self::DeviceNotFound => "device not found",
            Self::DeviceUnavailable => "device unavailable",
        };
        f.write_str(text)
    }
}

/// Top-level error type for Duocast operations.
#[derive(Debug, thiserror::Error)]
pub enum DuocastError {
    /// A capture device could not be acquired. Kept distinct from every
    /// other failure so hosts can show an actionable message.
    #[error("Could not acquire {device} ({reason}): {message}")]
    Acquisition {
        device: String,
        reason: AcquisitionFailure,
        message: String,
    },

    #[error("Cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Seek to {target_secs:.3}s did not complete within {timeout_ms}ms")]
    SeekTimeout { target_secs: f64, timeout_ms: u64 },

    #[error("Export error: {message}")]
    Export { message: String },

    #[error("Record store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using DuocastError.
pub type DuocastResult<T> = Result<T, DuocastError>;

impl DuocastError {
    pub fn acquisition(
        device: impl Into<String>,
        reason: AcquisitionFailure,
        msg: impl Into<String>,
    ) -> Self {
        Self::Acquisition {
            device: device.into(),
            reason,
            message: msg.into(),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, state: impl fmt::Debug) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: format!("{state:?}"),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export {
            message: msg.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this is a device acquisition failure.
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Self::Acquisition { .. })
    }

    /// The acquisition reason, if this is an acquisition failure.
    pub fn acquisition_reason(&self) -> Option<AcquisitionFailure> {
        match self {
            Self::Acquisition { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
