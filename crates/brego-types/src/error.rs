//! Error types for data parsing in brego-types.

use thiserror::Error;

/// Errors that can occur when decoding readings or wire lines.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The input was well-formed but did not describe valid readings.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The input was not valid JSON for the expected shape.
    #[cfg(feature = "serde")]
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using brego-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
