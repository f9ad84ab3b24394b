use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Task, TaskQuery, User},
    error::ApiError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub credential: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
    /// The team the server resolves identities against.
    #[serde(default)]
    pub roster: Vec<User>,
}

/// Query-string form of [`TaskQuery`]. `from`/`to` win over `assignee` when both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueryParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

impl From<&TaskQuery> for TaskQueryParams {
    fn from(query: &TaskQuery) -> Self {
        match query {
            TaskQuery::All => Self::default(),
            TaskQuery::Assignee { name } => Self {
                assignee: Some(name.clone()),
                ..Self::default()
            },
            TaskQuery::DateRange { start, end } => Self {
                from: Some(*start),
                to: Some(*end),
                ..Self::default()
            },
        }
    }
}

impl TaskQueryParams {
    /// A half-open range (only `from` or only `to`) is rejected.
    pub fn into_query(self) -> Result<TaskQuery, &'static str> {
        match (self.from, self.to, self.assignee) {
            (Some(start), Some(end), _) => Ok(TaskQuery::DateRange { start, end }),
            (Some(_), None, _) | (None, Some(_), _) => Err("both from and to are required"),
            (None, None, Some(name)) => Ok(TaskQuery::Assignee { name }),
            (None, None, None) => Ok(TaskQuery::All),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full result set of the subscribed query.
    TaskSnapshot { tasks: Vec<Task> },
    Error(ApiError),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
