use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tasks::{CreateTaskFields, create_task_in};
use super::{ApiError, ApiJson, ApiPath, SharedState};
use crate::auth::CurrentUser;
use crate::db::{AssignmentChanges, NewAssignment};
use crate::errors::StudyError;
use crate::models::AssignmentStatus;
use crate::progress::{self, MemberProgress};
use crate::ws::WsMessage;

#[derive(Deserialize)]
pub struct CreateAssignmentRequest {
    pub title: String,
    pub description: Option<String>,
    pub weighting: Option<i32>,
    pub deadline: DateTime<Utc>,
    pub final_grade: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateAssignmentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub weighting: Option<i32>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: Option<AssignmentStatus>,
    pub final_grade: Option<f64>,
}

#[derive(Serialize)]
pub struct ProgressReport {
    pub assignment_id: i64,
    pub progress: u8,
    pub members: Vec<MemberProgress>,
}

pub async fn list_assignments(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let thresholds = state.config.calendar.thresholds();
    let user_id = user.user.id;
    let summaries = state
        .db
        .call(move |db| db.list_assignment_summaries(user_id, Utc::now(), &thresholds))
        .await?;
    Ok(Json(summaries))
}

pub async fn create_assignment(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<CreateAssignmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewAssignment {
        title: req.title,
        description: req.description.unwrap_or_default(),
        weighting: req.weighting,
        deadline: req.deadline,
        final_grade: req.final_grade,
    };
    let creator_id = user.user.id;
    let assignment = state
        .db
        .call(move |db| db.create_assignment(creator_id, &new))
        .await?;
    tracing::info!(assignment_id = assignment.id, creator_id, "assignment created");
    state.broadcast(&WsMessage::AssignmentCreated {
        assignment: assignment.clone(),
    });
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn get_assignment(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let thresholds = state.config.calendar.thresholds();
    let user_id = user.user.id;
    let detail = state
        .db
        .call(move |db| {
            db.accessible_assignment(user_id, id)?;
            db.get_assignment_detail(id, Utc::now(), &thresholds)?
                .ok_or_else(|| StudyError::not_found("Assignment", id).into())
        })
        .await?;
    Ok(Json(detail))
}

pub async fn update_assignment(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateAssignmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changes = AssignmentChanges {
        title: req.title,
        description: req.description,
        weighting: req.weighting,
        deadline: req.deadline,
        status: req.status,
        final_grade: req.final_grade,
    };
    let user_id = user.user.id;
    let assignment = state
        .db
        .call(move |db| {
            db.accessible_assignment(user_id, id)?;
            db.update_assignment(id, &changes)
        })
        .await?;
    state.broadcast(&WsMessage::AssignmentUpdated {
        assignment: assignment.clone(),
    });
    Ok(Json(assignment))
}

pub async fn delete_assignment(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    state
        .db
        .call(move |db| {
            db.accessible_assignment(user_id, id)?;
            db.delete_assignment(id)
        })
        .await?;
    tracing::info!(assignment_id = id, "assignment deleted");
    state.broadcast(&WsMessage::AssignmentDeleted { assignment_id: id });
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_assignment_tasks(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let tasks = state
        .db
        .call(move |db| {
            db.accessible_assignment(user_id, id)?;
            db.list_tasks_with_assignees(id)
        })
        .await?;
    Ok(Json(tasks))
}

pub async fn create_assignment_task(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(fields): ApiJson<CreateTaskFields>,
) -> Result<impl IntoResponse, ApiError> {
    let task = create_task_in(&state, user.user.id, id, fields).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_board(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let board = state
        .db
        .call(move |db| {
            db.accessible_assignment(user_id, id)?;
            db.get_board(id)
        })
        .await?;
    Ok(Json(board))
}

pub async fn get_progress(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let report = state
        .db
        .call(move |db| {
            let assignment = db.accessible_assignment(user_id, id)?;
            let tasks = db.list_tasks_with_assignees(id)?;
            let members = db.list_users_for_assignment(id)?;
            Ok(ProgressReport {
                assignment_id: id,
                progress: assignment.progress,
                members: progress::member_progress(&tasks, &members),
            })
        })
        .await?;
    Ok(Json(report))
}
