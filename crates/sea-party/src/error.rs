//! Error taxonomy for the Party Dispatcher layer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    SchedulerNotFound = 1,
    SpawnFailed = 2,
    RoleNotFound = 3,
    AbilityMissing = 4,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PartyError {
    #[error("no scheduler registered for tag {0}")]
    SchedulerNotFound(u32),
    #[error("failed to create fiber for role {0:?}")]
    SpawnFailed(String),
    #[error("no role bound to slot name {0:?}")]
    RoleNotFound(String),
    #[error("role {0:?} does not declare ability {1:?}")]
    AbilityMissing(String, String),
}

impl PartyError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            PartyError::SchedulerNotFound(_) => ErrorCode::SchedulerNotFound,
            PartyError::SpawnFailed(_) => ErrorCode::SpawnFailed,
            PartyError::RoleNotFound(_) => ErrorCode::RoleNotFound,
            PartyError::AbilityMissing(..) => ErrorCode::AbilityMissing,
        }
    }
}

pub type PartyResult<T> = Result<T, PartyError>;
