use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{BoardDb, collect_rows};
use crate::errors::StudyError;
use crate::models::Event;

const EVENT_COLUMNS: &str = "id, user_id, title, start_time, end_time, location, description, color, event_type, assignment_id, created_at";

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub event_type: Option<String>,
    pub assignment_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct EventChanges {
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub event_type: Option<String>,
    pub assignment_id: Option<i64>,
}

/// Event query; `from`/`to` keep events overlapping the range.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub assignment_id: Option<i64>,
}

fn validate_event(title: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if title.trim().is_empty() {
        return Err(StudyError::validation("title must not be empty").into());
    }
    if end < start {
        return Err(StudyError::validation("end must not be before start").into());
    }
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        start: row.get(3)?,
        end: row.get(4)?,
        location: row.get(5)?,
        description: row.get(6)?,
        color: row.get(7)?,
        event_type: row.get(8)?,
        assignment_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

impl BoardDb {
    // ── Event CRUD ────────────────────────────────────────────────────

    pub fn create_event(&self, user_id: i64, new: &NewEvent) -> Result<Event> {
        validate_event(&new.title, new.start, new.end)?;
        if self.get_user(user_id)?.is_none() {
            return Err(StudyError::not_found("User", user_id).into());
        }
        if let Some(assignment_id) = new.assignment_id {
            self.accessible_assignment(user_id, assignment_id)?;
        }
        self.conn
            .execute(
                "INSERT INTO events (user_id, title, start_time, end_time, location, description, color, event_type, assignment_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user_id,
                    new.title.trim(),
                    new.start,
                    new.end,
                    new.location,
                    new.description,
                    new.color,
                    new.event_type,
                    new.assignment_id
                ],
            )
            .context("Failed to insert event")?;
        let id = self.conn.last_insert_rowid();
        self.get_event(id)?.context("Event not found after insert")
    }

    pub fn get_event(&self, id: i64) -> Result<Option<Event>> {
        self.conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                event_from_row,
            )
            .optional()
            .context("Failed to query event")
    }

    /// The user's own event, or `NotFound`.
    pub fn owned_event(&self, user_id: i64, id: i64) -> Result<Event> {
        match self.get_event(id)? {
            Some(event) if event.user_id == user_id => Ok(event),
            _ => Err(StudyError::not_found("Event", id).into()),
        }
    }

    pub fn list_events_for_user(&self, user_id: i64, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR end_time >= ?2)
                   AND (?3 IS NULL OR start_time <= ?3)
                   AND (?4 IS NULL OR event_type = ?4)
                   AND (?5 IS NULL OR assignment_id = ?5)
                 ORDER BY start_time, id"
            ))
            .context("Failed to prepare list_events_for_user")?;
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    filter.from,
                    filter.to,
                    filter.event_type,
                    filter.assignment_id
                ],
                event_from_row,
            )
            .context("Failed to query events")?;
        collect_rows(rows, "event")
    }

    pub fn update_event(&self, user_id: i64, id: i64, changes: &EventChanges) -> Result<Event> {
        let existing = self.owned_event(user_id, id)?;
        let title = changes.title.as_deref().unwrap_or(&existing.title);
        validate_event(
            title,
            changes.start.unwrap_or(existing.start),
            changes.end.unwrap_or(existing.end),
        )?;
        if let Some(assignment_id) = changes.assignment_id {
            self.accessible_assignment(user_id, assignment_id)?;
        }

        self.conn
            .execute(
                "UPDATE events SET
                    title = COALESCE(?1, title),
                    start_time = COALESCE(?2, start_time),
                    end_time = COALESCE(?3, end_time),
                    location = COALESCE(?4, location),
                    description = COALESCE(?5, description),
                    color = COALESCE(?6, color),
                    event_type = COALESCE(?7, event_type),
                    assignment_id = COALESCE(?8, assignment_id)
                 WHERE id = ?9",
                params![
                    changes.title.as_deref().map(str::trim),
                    changes.start,
                    changes.end,
                    changes.location,
                    changes.description,
                    changes.color,
                    changes.event_type,
                    changes.assignment_id,
                    id
                ],
            )
            .context("Failed to update event")?;
        self.owned_event(user_id, id)
    }

    pub fn delete_event(&self, user_id: i64, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete event")?;
        Ok(count > 0)
    }
}
