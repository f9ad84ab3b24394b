use serde::{Deserialize, Serialize};

use crate::policy::PolicyViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCredential,
    UnauthorizedUser,
    PermissionDenied,
    Validation,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<PolicyViolation> for ApiError {
    fn from(value: PolicyViolation) -> Self {
        match value {
            PolicyViolation::PermissionDenied(message) => {
                Self::new(ErrorCode::PermissionDenied, message)
            }
            PolicyViolation::Validation(message) => Self::new(ErrorCode::Validation, message),
        }
    }
}
