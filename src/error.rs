//! Flagnet error types.
//!
//! Errors split along who can fix them:
//!
//! - **Client errors**: [`FlagnetError::InvalidImage`] is the only variant a
//!   caller can recover from by retrying with a different upload. The HTTP
//!   layer maps it to `400 Bad Request`.
//! - **Startup errors**: [`FlagnetError::ModelLoad`] and
//!   [`FlagnetError::Config`] are fatal; the process cannot serve without a
//!   model.
//! - **Server errors**: everything else, including
//!   [`FlagnetError::Inference`], which is unreachable for inputs that went
//!   through the preprocessor.

use thiserror::Error;

/// Flagnet errors.
#[derive(Error, Debug)]
pub enum FlagnetError {
    /// Upload is missing, undecodable, or cannot be turned into RGB.
    #[error("Invalid image file: {0}")]
    InvalidImage(String),

    /// Parameter file missing, unreadable, or incompatible with the architecture.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Numeric or shape failure during the forward pass.
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Flagnet operations
pub type Result<T> = std::result::Result<T, FlagnetError>;

impl FlagnetError {
    /// Whether the caller caused this error and may retry with other input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FlagnetError::InvalidImage(_))
    }
}

impl From<toml::de::Error> for FlagnetError {
    fn from(err: toml::de::Error) -> Self {
        FlagnetError::Config(err.to_string())
    }
}

impl From<safetensors::SafeTensorError> for FlagnetError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        FlagnetError::ModelLoad(format!("Failed to parse safetensors: {err}"))
    }
}

impl From<image::ImageError> for FlagnetError {
    fn from(err: image::ImageError) -> Self {
        FlagnetError::InvalidImage(err.to_string())
    }
}
