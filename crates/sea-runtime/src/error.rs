//! Error taxonomy for `sea-runtime`, mapped 1:1 onto numeric
//! codes ("OK | CLOSED | FULL | EMPTY | ERROR | TIMEOUT" plus the
//! scheduler's own resource-exhaustion cases).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Closed = 1,
    Full = 2,
    Empty = 3,
    Timeout = 4,
    Cancelled = 5,
    SpawnFailed = 6,
    Error = 7,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("channel is closed")]
    Closed,
    #[error("channel buffer is full")]
    Full,
    #[error("channel buffer is empty")]
    Empty,
    #[error("operation timed out")]
    Timeout,
    #[error("fiber or scope was cancelled")]
    Cancelled,
    #[error("failed to create fiber: {0}")]
    SpawnFailed(String),
}

impl RuntimeError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            RuntimeError::Closed => ErrorCode::Closed,
            RuntimeError::Full => ErrorCode::Full,
            RuntimeError::Empty => ErrorCode::Empty,
            RuntimeError::Timeout => ErrorCode::Timeout,
            RuntimeError::Cancelled => ErrorCode::Cancelled,
            RuntimeError::SpawnFailed(_) => ErrorCode::SpawnFailed,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_its_numbered_code() {
        assert_eq!(RuntimeError::Closed.code(), ErrorCode::Closed);
        assert_eq!(RuntimeError::Full.code(), ErrorCode::Full);
        assert_eq!(RuntimeError::Empty.code(), ErrorCode::Empty);
        assert_eq!(RuntimeError::Timeout.code(), ErrorCode::Timeout);
        assert_eq!(RuntimeError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            RuntimeError::SpawnFailed("oom".into()).code(),
            ErrorCode::SpawnFailed
        );
    }
}
