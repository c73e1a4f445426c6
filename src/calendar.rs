//! Calendar entries derived from events, assignment deadlines and task due
//! dates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Assignment, Event, Task, TaskStatus};
use crate::progress::{DeadlineStatus, UrgencyThresholds};

/// Colour for events created without one.
pub const DEFAULT_EVENT_COLOR: &str = "#6366f1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Event,
    AssignmentDeadline,
    TaskDue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEntry {
    pub kind: EntryKind,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub color: String,
    pub assignment_id: Option<i64>,
    pub task_id: Option<i64>,
    pub event_id: Option<i64>,
}

/// Inclusive time window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Window {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| end >= from) && self.to.is_none_or(|to| start <= to)
    }
}

pub struct CalendarInput<'a> {
    pub assignments: &'a [Assignment],
    pub tasks: &'a [Task],
    pub events: &'a [Event],
}

pub fn derive_entries(
    input: &CalendarInput<'_>,
    window: &Window,
    now: DateTime<Utc>,
    thresholds: &UrgencyThresholds,
) -> Vec<CalendarEntry> {
    let mut entries = Vec::new();

    for e in input.events {
        entries.push(CalendarEntry {
            kind: EntryKind::Event,
            title: e.title.clone(),
            start: e.start,
            end: e.end,
            color: e
                .color
                .clone()
                .unwrap_or_else(|| DEFAULT_EVENT_COLOR.to_string()),
            assignment_id: e.assignment_id,
            task_id: None,
            event_id: Some(e.id),
        });
    }

    for a in input.assignments {
        let status = DeadlineStatus::compute(a.deadline, now, a.progress, thresholds);
        entries.push(CalendarEntry {
            kind: EntryKind::AssignmentDeadline,
            title: format!("{} due", a.title),
            start: a.deadline,
            end: a.deadline,
            color: status.color,
            assignment_id: Some(a.id),
            task_id: None,
            event_id: None,
        });
    }

    for t in input.tasks {
        let Some(due) = t.due_date else { continue };
        let progress = if t.status == TaskStatus::Completed { 100 } else { 0 };
        let status = DeadlineStatus::compute(due, now, progress, thresholds);
        entries.push(CalendarEntry {
            kind: EntryKind::TaskDue,
            title: t.title.clone(),
            start: due,
            end: due,
            color: status.color,
            assignment_id: Some(t.assignment_id),
            task_id: Some(t.id),
            event_id: None,
        });
    }

    entries.retain(|e| window.overlaps(e.start, e.end));
    entries.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.kind.cmp(&b.kind))
            .then_with(|| a.title.cmp(&b.title))
    });
    entries
}
