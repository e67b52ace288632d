//! Error types for RustRNNT.

use thiserror::Error;

/// Main error type for transducer operations.
#[derive(Error, Debug)]
pub enum RnntError {
    /// Configuration errors (fatal, construction-time): invalid weight
    /// combinations, reverse rescoring without a reverse-capable decoder.
    #[error("Config error: {0}")]
    Config(String),

    /// Precondition violations (fatal, call-time): wrong batch size,
    /// mismatched leading dimensions, zero decoding chunk size.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Inference errors from collaborator modules.
    #[error("Inference error: {0}")]
    Inference(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for transducer operations.
pub type RnntResult<T> = Result<T, RnntError>;
