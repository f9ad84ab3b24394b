use shared::{
    domain::TaskId,
    error::{ApiError, ErrorCode},
    policy::PolicyViolation,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskBoardError {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("{email} is not on the team roster")]
    UnauthorizedUser { email: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not signed in")]
    NotSignedIn,
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl TaskBoardError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable(err.to_string())
    }
}

impl From<PolicyViolation> for TaskBoardError {
    fn from(value: PolicyViolation) -> Self {
        match value {
            PolicyViolation::PermissionDenied(message) => Self::PermissionDenied(message),
            PolicyViolation::Validation(message) => Self::Validation(message),
        }
    }
}

impl From<ApiError> for TaskBoardError {
    fn from(value: ApiError) -> Self {
        match value.code {
            ErrorCode::InvalidCredential => Self::InvalidCredential,
            ErrorCode::UnauthorizedUser => Self::UnauthorizedUser {
                email: value.message,
            },
            ErrorCode::PermissionDenied => Self::PermissionDenied(value.message),
            ErrorCode::Validation => Self::Validation(value.message),
            ErrorCode::NotFound => Self::NotFound(TaskId(value.message)),
            ErrorCode::Internal => Self::BackendUnavailable(value.message),
        }
    }
}

pub type Result<T, E = TaskBoardError> = std::result::Result<T, E>;
