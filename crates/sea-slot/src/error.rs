use std::fmt;

/// Numeric error codes, stable across crate versions, matching the
/// caller-branches-on-a-code taxonomy the rest of the API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidHandle = 1,
    TypeMismatch = 2,
    OutOfMemory = 3,
    SlotNotFound = 4,
    TableFull = 5,
    TokenRequired = 6,
    TokenInvalid = 7,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Validation and resource-exhaustion errors surfaced by [`crate::SlotManager`].
///
/// These are always reported to the caller and never retried inside the
/// core.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("handle is stale or forged")]
    InvalidHandle,
    #[error("stored type does not match handle's type tag")]
    TypeMismatch,
    #[error("slot table or memory pool exhausted")]
    OutOfMemory,
    #[error("slot id has no occupied entry")]
    SlotNotFound,
    #[error("slot table is at capacity")]
    TableFull,
    #[error("operation requires a capability token in secure mode")]
    TokenRequired,
    #[error("presented capability token failed validation")]
    TokenInvalid,
}

impl SlotError {
    #[must_use]
    pub fn code(self) -> ErrorCode {
        match self {
            SlotError::InvalidHandle => ErrorCode::InvalidHandle,
            SlotError::TypeMismatch => ErrorCode::TypeMismatch,
            SlotError::OutOfMemory => ErrorCode::OutOfMemory,
            SlotError::SlotNotFound => ErrorCode::SlotNotFound,
            SlotError::TableFull => ErrorCode::TableFull,
            SlotError::TokenRequired => ErrorCode::TokenRequired,
            SlotError::TokenInvalid => ErrorCode::TokenInvalid,
        }
    }
}

pub type SlotResult<T> = Result<T, SlotError>;
