use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;

use super::{ApiError, ApiJson, ApiQuery, SharedState};
use crate::auth::CurrentUser;
use crate::errors::StudyError;

#[derive(Deserialize)]
pub struct TaskAssigneeQuery {
    pub task_id: i64,
}

#[derive(Deserialize)]
pub struct TaskAssigneeRequest {
    pub task_id: i64,
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct AssignmentAssigneeQuery {
    pub assignment_id: i64,
}

#[derive(Deserialize)]
pub struct AssignmentAssigneeRequest {
    pub assignment_id: i64,
    pub user_id: i64,
}

/// 201 for a new link, 200 when it already existed.
fn link_status(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

// ── Task assignees ────────────────────────────────────────────────────

pub async fn list_task_assignees(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<TaskAssigneeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let links = state
        .db
        .call(move |db| {
            db.accessible_task(user_id, query.task_id)?;
            db.list_task_assignees(query.task_id)
        })
        .await?;
    Ok(Json(links))
}

pub async fn assign_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<TaskAssigneeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = user.user.id;
    let (created, link) = state
        .db
        .call(move |db| {
            db.accessible_task(caller, req.task_id)?;
            let existed = db
                .list_task_assignees(req.task_id)?
                .iter()
                .any(|a| a.user_id == req.user_id);
            let link = db.assign_user_to_task(req.task_id, req.user_id)?;
            Ok((!existed, link))
        })
        .await?;
    if created {
        tracing::info!(task_id = link.parent_id, user_id = link.user_id, "task assigned");
    }
    Ok((link_status(created), Json(link)))
}

pub async fn unassign_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(req): ApiQuery<TaskAssigneeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = user.user.id;
    state
        .db
        .call(move |db| {
            db.accessible_task(caller, req.task_id)?;
            if db.unassign_user_from_task(req.task_id, req.user_id)? {
                Ok(())
            } else {
                Err(StudyError::not_found("Task assignee", req.user_id).into())
            }
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Assignment assignees ──────────────────────────────────────────────

pub async fn list_assignment_assignees(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<AssignmentAssigneeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let links = state
        .db
        .call(move |db| {
            db.accessible_assignment(user_id, query.assignment_id)?;
            db.list_assignment_assignees(query.assignment_id)
        })
        .await?;
    Ok(Json(links))
}

pub async fn assign_assignment(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<AssignmentAssigneeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = user.user.id;
    let (created, link) = state
        .db
        .call(move |db| {
            db.accessible_assignment(caller, req.assignment_id)?;
            let existed = db
                .list_assignment_assignees(req.assignment_id)?
                .iter()
                .any(|a| a.user_id == req.user_id);
            let link = db.assign_user_to_assignment(req.assignment_id, req.user_id)?;
            Ok((!existed, link))
        })
        .await?;
    if created {
        tracing::info!(
            assignment_id = link.parent_id,
            user_id = link.user_id,
            "assignment shared"
        );
    }
    Ok((link_status(created), Json(link)))
}

pub async fn unassign_assignment(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(req): ApiQuery<AssignmentAssigneeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = user.user.id;
    state
        .db
        .call(move |db| {
            db.accessible_assignment(caller, req.assignment_id)?;
            if db.unassign_user_from_assignment(req.assignment_id, req.user_id)? {
                Ok(())
            } else {
                Err(StudyError::not_found("Assignment assignee", req.user_id).into())
            }
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
