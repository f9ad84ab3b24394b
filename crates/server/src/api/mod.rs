use shared::{
    domain::{NewTask, Task, TaskId, TaskPatch, TaskQuery, User},
    error::{ApiError, ErrorCode},
    policy,
    protocol::{LoginRequest, LoginResponse},
    roster::Roster,
};
use storage::Storage;
use tracing::{info, warn};

use crate::auth::SessionAuthority;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub roster: Roster,
    pub sessions: SessionAuthority,
}

pub async fn login(ctx: &ApiContext, req: &LoginRequest) -> Result<LoginResponse, ApiError> {
    let verified = ctx
        .storage
        .verify_credential(&req.email, &req.credential)
        .await
        .map_err(internal)?;
    if !verified {
        warn!(email = %req.email.trim(), "rejected login");
        return Err(ApiError::new(ErrorCode::InvalidCredential, "invalid credential"));
    }
    let user = roster_user(ctx, &req.email)?;
    let token = ctx
        .sessions
        .mint(&user)
        .map_err(internal)?;
    info!(name = %user.name, role = %user.role, "login");
    Ok(LoginResponse {
        token,
        user,
        roster: ctx.roster.users().to_vec(),
    })
}

/// Resolves a bearer token to the roster user it was minted for.
pub fn authorize(ctx: &ApiContext, token: &str) -> Result<User, ApiError> {
    let claims = ctx
        .sessions
        .verify(token)
        .map_err(|_| ApiError::new(ErrorCode::InvalidCredential, "invalid or expired session"))?;
    roster_user(ctx, &claims.sub)
}

pub async fn list_tasks(ctx: &ApiContext, query: &TaskQuery) -> Result<Vec<Task>, ApiError> {
    if let TaskQuery::DateRange { start, end } = query {
        policy::validate_range(*start, *end)?;
    }
    ctx.storage.list_tasks(query).await.map_err(internal)
}

pub async fn get_task(ctx: &ApiContext, id: &TaskId) -> Result<Task, ApiError> {
    ctx.storage
        .get_task(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(id))
}

pub async fn create_task(
    ctx: &ApiContext,
    actor: &User,
    new_task: NewTask,
) -> Result<Task, ApiError> {
    policy::ensure_can_create(actor)?;
    let new_task = NewTask {
        title: new_task.title.trim().to_string(),
        description: new_task.description.trim().to_string(),
        assignee: new_task.assignee.trim().to_string(),
        ..new_task
    };
    policy::validate_new_task(&ctx.roster, &new_task)?;
    let task = ctx.storage.create_task(&new_task).await.map_err(internal)?;
    info!(task_id = %task.id, by = %actor.name, "task created");
    Ok(task)
}

pub async fn update_task(
    ctx: &ApiContext,
    actor: &User,
    id: &TaskId,
    patch: &TaskPatch,
) -> Result<Task, ApiError> {
    let current = get_task(ctx, id).await?;
    policy::ensure_can_patch(actor, &current, patch)?;
    policy::validate_patch(&current, patch)?;
    let task = ctx
        .storage
        .update_task(id, patch)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(id))?;
    info!(task_id = %id, by = %actor.name, status = %task.status, "task updated");
    Ok(task)
}

pub async fn delete_task(ctx: &ApiContext, actor: &User, id: &TaskId) -> Result<(), ApiError> {
    policy::ensure_can_delete(actor)?;
    let deleted = ctx.storage.delete_task(id).await.map_err(internal)?;
    if !deleted {
        return Err(not_found(id));
    }
    info!(task_id = %id, by = %actor.name, "task deleted");
    Ok(())
}

fn roster_user(ctx: &ApiContext, email: &str) -> Result<User, ApiError> {
    ctx.roster.find_by_email(email).cloned().ok_or_else(|| {
        ApiError::new(ErrorCode::UnauthorizedUser, email.trim().to_string())
    })
}

fn not_found(id: &TaskId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, id.to_string())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
