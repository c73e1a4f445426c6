use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::{ApiError, ApiJson, ApiPath, ApiQuery, SharedState};
use crate::auth::CurrentUser;
use crate::errors::StudyError;

#[derive(Deserialize)]
pub struct UserQuery {
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub image: Option<String>,
    pub role: Option<String>,
}

/// All users, or the single user matching `?email=`.
pub async fn list_users(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> Result<Response, ApiError> {
    match query.email {
        Some(email) => {
            let lookup = email.clone();
            let user = state
                .db
                .call(move |db| db.get_user_by_email(&lookup))
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("User {} not found", email)))?;
            Ok(Json(user).into_response())
        }
        None => {
            let users = state.db.call(|db| db.list_users()).await?;
            Ok(Json(users).into_response())
        }
    }
}

pub async fn create_user(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .call(move |db| {
            db.create_user(
                req.name.as_deref(),
                &req.email,
                req.image.as_deref(),
                req.role.as_deref(),
            )
        })
        .await?;
    tracing::info!(user_id = user.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .call(move |db| {
            db.get_user(id)?
                .ok_or_else(|| StudyError::not_found("User", id).into())
        })
        .await?;
    Ok(Json(user))
}

/// Profiles are only editable by their owner; any other id reads as missing.
pub async fn update_user(
    State(state): State<SharedState>,
    caller: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if caller.user.id != id {
        return Err(ApiError::NotFound(format!("User {} not found", id)));
    }
    let user = state
        .db
        .call(move |db| {
            db.update_user(
                id,
                req.name.as_deref(),
                req.image.as_deref(),
                req.role.as_deref(),
            )
        })
        .await?;
    Ok(Json(user))
}
