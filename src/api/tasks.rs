use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ApiError, ApiJson, ApiPath, ApiQuery, AppState, SharedState};
use crate::auth::CurrentUser;
use crate::db::{NewTask, TaskChanges, TaskFilter};
use crate::models::{Task, TaskPriority, TaskStatus, TaskWithAssignees};
use crate::ws::WsMessage;

/// Task body shared by `POST /tasks` and `POST /assignments/{id}/tasks`.
#[derive(Deserialize)]
pub struct CreateTaskFields {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub weighting: Option<i32>,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub assignment_id: i64,
    #[serde(flatten)]
    pub fields: CreateTaskFields,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub weighting: Option<i32>,
}

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub status: TaskStatus,
    pub position: i32,
}

#[derive(Deserialize)]
pub struct TaskQuery {
    pub assignment_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<i64>,
}

pub(super) async fn create_task_in(
    state: &AppState,
    user_id: i64,
    assignment_id: i64,
    fields: CreateTaskFields,
) -> Result<Task, ApiError> {
    let new = NewTask {
        assignment_id,
        title: fields.title,
        description: fields.description.unwrap_or_default(),
        status: fields.status,
        priority: fields.priority,
        due_date: fields.due_date,
        weighting: fields.weighting,
    };
    let (before, task, after) = state
        .db
        .call(move |db| {
            let before = db.accessible_assignment(user_id, assignment_id)?.progress;
            let task = db.create_task(&new)?;
            let after = db.require_assignment(assignment_id)?.progress;
            Ok((before, task, after))
        })
        .await?;
    tracing::debug!(task_id = task.id, assignment_id, "task created");
    state.broadcast(&WsMessage::TaskCreated { task: task.clone() });
    state.broadcast_progress(assignment_id, before, after);
    Ok(task)
}

pub async fn list_tasks(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<TaskQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = TaskFilter {
        assignment_id: query.assignment_id,
        status: query.status,
        assignee_id: query.assignee_id,
        visible_to: Some(user.user.id),
    };
    let tasks = state.db.call(move |db| db.list_tasks(&filter)).await?;
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = create_task_in(&state, user.user.id, req.assignment_id, req.fields).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let task = state
        .db
        .call(move |db| {
            let task = db.accessible_task(user_id, id)?;
            let assignee_ids = db
                .list_task_assignees(id)?
                .into_iter()
                .map(|a| a.user_id)
                .collect();
            Ok(TaskWithAssignees { task, assignee_ids })
        })
        .await?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changes = TaskChanges {
        title: req.title,
        description: req.description,
        status: req.status,
        priority: req.priority,
        due_date: req.due_date,
        weighting: req.weighting,
    };
    let user_id = user.user.id;
    let (before, task, after) = state
        .db
        .call(move |db| {
            let existing = db.accessible_task(user_id, id)?;
            let before = db.require_assignment(existing.assignment_id)?.progress;
            let task = db.update_task(id, &changes)?;
            let after = db.require_assignment(task.assignment_id)?.progress;
            Ok((before, task, after))
        })
        .await?;
    state.broadcast(&WsMessage::TaskUpdated { task: task.clone() });
    state.broadcast_progress(task.assignment_id, before, after);
    Ok(Json(task))
}

pub async fn move_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let (before, from_status, task, after) = state
        .db
        .call(move |db| {
            let existing = db.accessible_task(user_id, id)?;
            let before = db.require_assignment(existing.assignment_id)?.progress;
            let task = db.move_task(id, req.status, req.position)?;
            let after = db.require_assignment(task.assignment_id)?.progress;
            Ok((before, existing.status, task, after))
        })
        .await?;
    state.broadcast(&WsMessage::TaskMoved {
        task_id: task.id,
        assignment_id: task.assignment_id,
        from_status,
        to_status: task.status,
        position: task.position,
    });
    state.broadcast_progress(task.assignment_id, before, after);
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let (before, task, after) = state
        .db
        .call(move |db| {
            let existing = db.accessible_task(user_id, id)?;
            let before = db.require_assignment(existing.assignment_id)?.progress;
            db.delete_task(id)?;
            let after = db.require_assignment(existing.assignment_id)?.progress;
            Ok((before, existing, after))
        })
        .await?;
    state.broadcast(&WsMessage::TaskDeleted {
        task_id: id,
        assignment_id: task.assignment_id,
    });
    state.broadcast_progress(task.assignment_id, before, after);
    Ok(StatusCode::NO_CONTENT)
}
