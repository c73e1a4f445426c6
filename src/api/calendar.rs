use axum::{Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ApiError, ApiQuery, SharedState};
use crate::auth::CurrentUser;
use crate::calendar::{self, CalendarInput, Window};
use crate::db::{EventFilter, TaskFilter};

#[derive(Deserialize)]
pub struct CalendarQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Events, assignment deadlines and task due dates visible to the caller.
pub async fn get_calendar(
    State(state): State<SharedState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<CalendarQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let window = Window {
        from: query.from,
        to: query.to,
    };
    if let (Some(from), Some(to)) = (window.from, window.to)
        && to < from
    {
        return Err(ApiError::BadRequest(
            "`to` must not be before `from`".to_string(),
        ));
    }
    let thresholds = state.config.calendar.thresholds();
    let user_id = user.user.id;
    let entries = state
        .db
        .call(move |db| {
            let assignments = db.list_assignments_for_user(user_id)?;
            let tasks = db.list_tasks(&TaskFilter {
                visible_to: Some(user_id),
                ..Default::default()
            })?;
            let events = db.list_events_for_user(
                user_id,
                &EventFilter {
                    from: window.from,
                    to: window.to,
                    ..Default::default()
                },
            )?;
            let input = CalendarInput {
                assignments: &assignments,
                tasks: &tasks,
                events: &events,
            };
            Ok(calendar::derive_entries(&input, &window, Utc::now(), &thresholds))
        })
        .await?;
    Ok(Json(entries))
}
