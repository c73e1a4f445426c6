//! JSON REST interface.
//!
//! Handlers live in one submodule per resource; this module owns the shared
//! state, error mapping and extractor wrappers.

mod assignees;
mod assignments;
mod calendar;
mod events;
mod groups;
mod sessions;
mod tasks;
mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use tokio::sync::broadcast;

use crate::config::StudyboardToml;
use crate::db::DbHandle;
use crate::errors::StudyError;
use crate::ws::{WsMessage, broadcast_message};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub config: StudyboardToml,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, config: StudyboardToml) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        Self { db, ws_tx, config }
    }

    pub(crate) fn broadcast(&self, msg: &WsMessage) {
        broadcast_message(&self.ws_tx, msg);
    }

    /// Announce a progress recomputation when it changed the stored value.
    pub(crate) fn broadcast_progress(&self, assignment_id: i64, before: u8, after: u8) {
        if before != after {
            self.broadcast(&WsMessage::ProgressChanged {
                assignment_id,
                progress: after,
            });
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StudyError>() {
            Some(e @ StudyError::NotFound { .. }) => ApiError::NotFound(e.to_string()),
            Some(StudyError::Validation(msg)) => ApiError::BadRequest(msg.clone()),
            Some(StudyError::Unauthorized(msg)) => ApiError::Unauthorized(msg.clone()),
            _ => {
                tracing::error!(error = format!("{:#}", err), "request failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// `Json` whose rejections render as `{"error": ...}` with status 400.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/sign-in", post(sessions::request_sign_in))
        .route("/auth/verify", post(sessions::verify_sign_in))
        .route("/auth/session", get(sessions::current_session))
        .route("/auth/sign-out", post(sessions::sign_out))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/{id}", get(users::get_user).put(users::update_user))
        .route(
            "/assignments",
            get(assignments::list_assignments).post(assignments::create_assignment),
        )
        .route(
            "/assignments/{id}",
            get(assignments::get_assignment)
                .put(assignments::update_assignment)
                .delete(assignments::delete_assignment),
        )
        .route(
            "/assignments/{id}/tasks",
            get(assignments::list_assignment_tasks).post(assignments::create_assignment_task),
        )
        .route("/assignments/{id}/board", get(assignments::get_board))
        .route("/assignments/{id}/progress", get(assignments::get_progress))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/tasks/{id}/move", patch(tasks::move_task))
        .route("/events", get(events::list_events).post(events::create_event))
        .route(
            "/events/{id}",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route("/calendar", get(calendar::get_calendar))
        .route(
            "/task-assignee",
            get(assignees::list_task_assignees)
                .post(assignees::assign_task)
                .delete(assignees::unassign_task),
        )
        .route(
            "/assignment-assignees",
            get(assignees::list_assignment_assignees)
                .post(assignees::assign_assignment)
                .delete(assignees::unassign_assignment),
        )
        .route("/group", get(groups::list_groups).post(groups::create_group))
        .route(
            "/group/{id}",
            get(groups::get_group).delete(groups::delete_group),
        )
        .route(
            "/group-members",
            get(groups::list_members)
                .post(groups::add_member)
                .delete(groups::remove_member),
        )
}

async fn health_check() -> &'static str {
    "ok"
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = app.request("GET", "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_protected_route_requires_session() {
        let app = test_app();
        let response = app.request("GET", "/assignments", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].is_string());

        let response = app
            .request("GET", "/assignments", Some("not-a-real-token"), None)
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let app = test_app();
        let (_, token) = app.sign_in("ada@uni.test").await;
        let request = Request::builder()
            .method("POST")
            .uri("/assignments")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_bad_request() {
        let app = test_app();
        let (_, token) = app.sign_in("ada@uni.test").await;
        let response = app
            .request("GET", "/assignments/abc", Some(&token), None)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_mapping() {
        let cases: Vec<(anyhow::Error, StatusCode)> = vec![
            (StudyError::not_found("Task", 1).into(), StatusCode::NOT_FOUND),
            (StudyError::validation("bad").into(), StatusCode::BAD_REQUEST),
            (
                StudyError::Unauthorized("nope".into()).into(),
                StatusCode::UNAUTHORIZED,
            ),
            (
                anyhow::anyhow!("disk on fire"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_error_mapping_sees_through_context() {
        let err = anyhow::Error::from(StudyError::not_found("Assignment", 3))
            .context("Failed to load board");
        match ApiError::from(err) {
            ApiError::NotFound(msg) => assert_eq!(msg, "Assignment 3 not found"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }
}
