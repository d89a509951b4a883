//! Structural errors and the crate `Result` alias.

use thiserror::Error;

use crate::types::ResultCode;

/// Result type alias for structural failures outside the chain protocol.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Structural failures: corrupt records, undecodable payloads, bad arguments.
///
/// Protocol outcomes (conflicts, fencing, remote failures) travel as
/// [`ResultCode`] values instead.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A persisted intent record is malformed.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    /// A serialized request could not be decoded.
    #[error("decode error: {0}")]
    Decode(&'static str),
    /// Invalid argument supplied by a caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A protocol code surfaced where a `Result` was expected.
    #[error("operation failed: {0}")]
    Code(ResultCode),
}

impl ChainError {
    /// Maps the error onto the protocol code reported to clients.
    pub fn code(&self) -> ResultCode {
        match self {
            ChainError::CorruptRecord(_) | ChainError::Decode(_) => ResultCode::Unknown,
            ChainError::InvalidArgument(_) => ResultCode::InvalidData,
            ChainError::Code(code) => *code,
        }
    }
}

impl From<ResultCode> for ChainError {
    fn from(code: ResultCode) -> Self {
        ChainError::Code(code)
    }
}
