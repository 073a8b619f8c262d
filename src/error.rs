//! Error types for the retune engine

use thiserror::Error;

/// Main error type for retune
#[derive(Error, Debug)]
pub enum Error {
    #[error("Load error: {0}")]
    Load(String),

    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("Model missing: {0}")]
    ModelMissing(String),

    #[error("Analysis cancelled")]
    AnalysisCancelled,

    #[error("Synthesis cancelled")]
    SynthesisCancelled,

    #[error("Synthesis failure: {0}")]
    SynthesisFailure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

impl Error {
    /// Exit code for CLI shells, per the documented process contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Load(_) | Error::FileNotFound(_) | Error::InvalidFormat(_) => 2,
            Error::AnalysisCancelled | Error::ModelMissing(_) => 3,
            Error::SynthesisCancelled | Error::SynthesisFailure(_) => 4,
            _ => 1,
        }
    }

    /// Cancellations are acknowledged, not reported to the user.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::AnalysisCancelled | Error::SynthesisCancelled)
    }
}

/// Result type for retune operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidFormat(err.to_string())
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Error::Audio(err.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::ShapeMismatch {
            expected: "valid shape".into(),
            actual: err.to_string(),
        }
    }
}

impl From<symphonia::core::errors::Error> for Error {
    fn from(err: symphonia::core::errors::Error) -> Self {
        Error::Load(err.to_string())
    }
}
