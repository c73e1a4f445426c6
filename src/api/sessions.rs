use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, SharedState};
use crate::auth::{self, CurrentUser, SESSION_COOKIE};
use crate::models::User;

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct SignInResponse {
    pub email: String,
    pub expires: DateTime<Utc>,
    /// Only echoed in dev mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub token: String,
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub user: User,
    pub expires: DateTime<Utc>,
}

pub async fn request_sign_in(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ttl = state.config.auth.verification_ttl();
    let ticket = state
        .db
        .call(move |db| auth::request_sign_in(db, &req.email, ttl, Utc::now()))
        .await?;
    let token = state.config.server.dev_mode.then_some(ticket.token);
    Ok((
        StatusCode::ACCEPTED,
        Json(SignInResponse {
            email: ticket.email,
            expires: ticket.expires,
            token,
        }),
    ))
}

pub async fn verify_sign_in(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ttl = state.config.auth.session_ttl();
    let signed = state
        .db
        .call(move |db| auth::verify_sign_in(db, &req.email, &req.token, ttl, Utc::now()))
        .await?;
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        signed.token,
        ttl.num_seconds()
    );
    Ok(([(header::SET_COOKIE, cookie)], Json(signed)))
}

pub async fn current_session(user: CurrentUser) -> Json<SessionInfo> {
    Json(SessionInfo {
        user: user.user,
        expires: user.session.expires,
    })
}

pub async fn sign_out(
    State(state): State<SharedState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let token_hash = user.token_hash;
    state
        .db
        .call(move |db| db.delete_session(&token_hash))
        .await?;
    tracing::info!(user_id = user.user.id, "session closed");
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]))
}
