use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ApiError, ApiJson, ApiPath, ApiQuery, SharedState};
use crate::auth::CurrentUser;
use crate::db::{EventChanges, EventFilter, NewEvent};
use crate::errors::StudyError;
use crate::ws::WsMessage;

#[derive(Deserialize)]
pub struct EventQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub assignment_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub event_type: Option<String>,
    pub assignment_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub event_type: Option<String>,
    pub assignment_id: Option<i64>,
}

pub async fn list_events(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<EventQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = EventFilter {
        from: query.from,
        to: query.to,
        event_type: query.event_type,
        assignment_id: query.assignment_id,
    };
    let user_id = user.user.id;
    let events = state
        .db
        .call(move |db| db.list_events_for_user(user_id, &filter))
        .await?;
    Ok(Json(events))
}

pub async fn create_event(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewEvent {
        title: req.title,
        start: req.start,
        end: req.end,
        location: req.location,
        description: req.description,
        color: req.color,
        event_type: req.event_type,
        assignment_id: req.assignment_id,
    };
    let user_id = user.user.id;
    let event = state
        .db
        .call(move |db| db.create_event(user_id, &new))
        .await?;
    state.broadcast(&WsMessage::EventCreated {
        event: event.clone(),
    });
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn get_event(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    let event = state
        .db
        .call(move |db| db.owned_event(user_id, id))
        .await?;
    Ok(Json(event))
}

pub async fn update_event(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changes = EventChanges {
        title: req.title,
        start: req.start,
        end: req.end,
        location: req.location,
        description: req.description,
        color: req.color,
        event_type: req.event_type,
        assignment_id: req.assignment_id,
    };
    let user_id = user.user.id;
    let event = state
        .db
        .call(move |db| db.update_event(user_id, id, &changes))
        .await?;
    state.broadcast(&WsMessage::EventUpdated {
        event: event.clone(),
    });
    Ok(Json(event))
}

pub async fn delete_event(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.user.id;
    state
        .db
        .call(move |db| {
            if db.delete_event(user_id, id)? {
                Ok(())
            } else {
                Err(StudyError::not_found("Event", id).into())
            }
        })
        .await?;
    state.broadcast(&WsMessage::EventDeleted { event_id: id });
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use crate::api::test_support::{body_json, test_app};

    #[tokio::test]
    async fn test_event_crud() {
        let app = test_app();
        let (_, token) = app.sign_in("ada@uni.test").await;

        let response = app
            .request(
                "POST",
                "/events",
                Some(&token),
                Some(json!({
                    "title": "Lecture",
                    "start": "2025-03-03T09:00:00Z",
                    "end": "2025-03-03T10:00:00Z",
                    "event_type": "lecture"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let event: Value = body_json(response.into_body()).await;
        let uri = format!("/events/{}", event["id"]);

        let response = app
            .request("PUT", &uri, Some(&token), Some(json!({"location": "Hall B"})))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let updated: Value = body_json(response.into_body()).await;
        assert_eq!(updated["location"], "Hall B");
        assert_eq!(updated["title"], "Lecture");

        let response = app.request("DELETE", &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.request("GET", &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app.request("DELETE", &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_end_before_start_is_bad_request() {
        let app = test_app();
        let (_, token) = app.sign_in("ada@uni.test").await;
        let response = app
            .request(
                "POST",
                "/events",
                Some(&token),
                Some(json!({
                    "title": "Backwards",
                    "start": "2025-03-03T10:00:00Z",
                    "end": "2025-03-03T09:00:00Z"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_filters_by_type_and_window() {
        let app = test_app();
        let (_, token) = app.sign_in("ada@uni.test").await;
        for (title, day, kind) in [("Mon", 3, "lecture"), ("Wed", 5, "lab"), ("Fri", 7, "lecture")] {
            app.request(
                "POST",
                "/events",
                Some(&token),
                Some(json!({
                    "title": title,
                    "start": format!("2025-03-0{}T09:00:00Z", day),
                    "end": format!("2025-03-0{}T10:00:00Z", day),
                    "event_type": kind
                })),
            )
            .await;
        }

        let response = app
            .request("GET", "/events?type=lecture", Some(&token), None)
            .await;
        let events: Vec<Value> = body_json(response.into_body()).await;
        assert_eq!(events.len(), 2);

        let response = app
            .request(
                "GET",
                "/events?from=2025-03-04T00:00:00Z&to=2025-03-06T00:00:00Z",
                Some(&token),
                None,
            )
            .await;
        let events: Vec<Value> = body_json(response.into_body()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["title"], "Wed");
    }

    #[tokio::test]
    async fn test_events_of_other_users_are_hidden() {
        let app = test_app();
        let (_, ada) = app.sign_in("ada@uni.test").await;
        let (_, eve) = app.sign_in("eve@uni.test").await;
        let response = app
            .request(
                "POST",
                "/events",
                Some(&ada),
                Some(json!({
                    "title": "Private",
                    "start": "2025-03-03T09:00:00Z",
                    "end": "2025-03-03T10:00:00Z"
                })),
            )
            .await;
        let event: Value = body_json(response.into_body()).await;
        let response = app
            .request("GET", &format!("/events/{}", event["id"]), Some(&eve), None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
