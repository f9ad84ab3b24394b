//! Role and field rules for task mutations.
//!
//! Both the board controller and the task service call into this module, so a
//! client that skips its own checks still hits the same wall on the server.

use chrono::NaiveDate;
use thiserror::Error;

use crate::{
    domain::{NewTask, Role, Task, TaskPatch, TaskStatus, User, TASK_DATE_FORMAT},
    roster::Roster,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn parse_task_date(raw: &str) -> Result<NaiveDate, PolicyViolation> {
    NaiveDate::parse_from_str(raw.trim(), TASK_DATE_FORMAT).map_err(|_| {
        PolicyViolation::Validation(format!("date '{raw}' is not in yyyy-MM-dd form"))
    })
}

pub fn ensure_can_create(actor: &User) -> Result<(), PolicyViolation> {
    if !actor.is_leader() {
        return Err(PolicyViolation::PermissionDenied(format!(
            "{} cannot create tasks",
            actor.name
        )));
    }
    Ok(())
}

pub fn validate_new_task(roster: &Roster, task: &NewTask) -> Result<(), PolicyViolation> {
    if task.title.trim().is_empty() {
        return Err(PolicyViolation::Validation("title is required".into()));
    }
    if task.assignee.trim().is_empty() {
        return Err(PolicyViolation::Validation("assignee is required".into()));
    }
    if !roster.is_member_name(&task.assignee) {
        return Err(PolicyViolation::Validation(format!(
            "assignee '{}' is not a team member",
            task.assignee
        )));
    }
    Ok(())
}

pub fn validate_patch(current: &Task, patch: &TaskPatch) -> Result<(), PolicyViolation> {
    if patch.is_empty() {
        return Err(PolicyViolation::Validation("nothing to update".into()));
    }
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(PolicyViolation::Validation("title must not be empty".into()));
        }
    }
    if current.status == TaskStatus::Complete && patch.status == Some(TaskStatus::Incomplete) {
        return Err(PolicyViolation::Validation(
            "a completed task cannot be reopened".into(),
        ));
    }
    Ok(())
}

/// Leaders may patch anything. Members may only report (status and note) on
/// tasks assigned to them.
pub fn ensure_can_patch(
    actor: &User,
    current: &Task,
    patch: &TaskPatch,
) -> Result<(), PolicyViolation> {
    match actor.role {
        Role::Leader => Ok(()),
        Role::Member => {
            if current.assignee != actor.name {
                return Err(PolicyViolation::PermissionDenied(format!(
                    "task {} is not assigned to {}",
                    current.id, actor.name
                )));
            }
            if !patch.is_report_only() {
                return Err(PolicyViolation::PermissionDenied(
                    "members may only report status and notes".into(),
                ));
            }
            Ok(())
        }
    }
}

pub fn ensure_can_complete(actor: &User, current: &Task) -> Result<(), PolicyViolation> {
    ensure_can_patch(actor, current, &TaskPatch::complete())
}

pub fn ensure_can_delete(actor: &User) -> Result<(), PolicyViolation> {
    if !actor.is_leader() {
        return Err(PolicyViolation::PermissionDenied(format!(
            "{} cannot delete tasks",
            actor.name
        )));
    }
    Ok(())
}

pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), PolicyViolation> {
    if start > end {
        return Err(PolicyViolation::Validation(format!(
            "range start {start} is after end {end}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/policy_tests.rs"]
mod tests;
