//! Derived assignment state: weighted progress, deadline status, urgency
//! colours, member breakdowns and board grouping.
//!
//! Everything here is pure. Callers pass `now` explicitly so the same inputs
//! always produce the same output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ColumnView, Task, TaskStatus, TaskWithAssignees, User};

const DAY_MS: i64 = 86_400_000;

/// Anything that contributes a weight toward an assignment's progress.
pub trait Weighted {
    fn weighting(&self) -> Option<i32>;
    fn is_completed(&self) -> bool;

    /// Absent weighting counts as 1; negative weighting counts as 0.
    fn effective_weight(&self) -> i64 {
        self.weighting().map_or(1, |w| i64::from(w.max(0)))
    }
}

impl Weighted for Task {
    fn weighting(&self) -> Option<i32> {
        self.weighting
    }

    fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

impl Weighted for TaskWithAssignees {
    fn weighting(&self) -> Option<i32> {
        self.task.weighting
    }

    fn is_completed(&self) -> bool {
        self.task.is_completed()
    }
}

/// `round(100 * completed / total)`, or 0 when there is nothing to weigh.
pub fn percent(completed_weight: i64, total_weight: i64) -> u8 {
    if total_weight <= 0 {
        return 0;
    }
    let completed = completed_weight.clamp(0, total_weight);
    // Integer round-half-up.
    let pct = (200 * completed + total_weight) / (2 * total_weight);
    pct as u8
}

/// Weighted completion percentage of a task list.
pub fn calculate_progress<T: Weighted>(tasks: &[T]) -> u8 {
    let (completed, total) = weight_totals(tasks.iter());
    percent(completed, total)
}

fn weight_totals<'a, T: Weighted + 'a>(tasks: impl Iterator<Item = &'a T>) -> (i64, i64) {
    tasks.fold((0, 0), |(done, total), t| {
        let w = t.effective_weight();
        if t.is_completed() {
            (done + w, total + w)
        } else {
            (done, total + w)
        }
    })
}

pub fn is_late(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    deadline < now
}

/// `ceil((deadline - now) / 1 day)`. A deadline missed by less than a day
/// reports `-1` rather than `0`, so anything late is negative.
pub fn days_remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (deadline - now).num_milliseconds();
    if ms >= 0 {
        (ms + DAY_MS - 1) / DAY_MS
    } else {
        // Integer division truncates toward zero, which is ceil here.
        match ms / DAY_MS {
            0 => -1,
            days => days,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Completed,
    Overdue,
    DueSoon,
    Upcoming,
    OnTrack,
}

impl Urgency {
    /// Background colour used by boards and calendar entries.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Completed => "#22c55e",
            Self::Overdue => "#ef4444",
            Self::DueSoon => "#f97316",
            Self::Upcoming => "#eab308",
            Self::OnTrack => "#3b82f6",
        }
    }
}

/// Day thresholds separating `DueSoon`, `Upcoming` and `OnTrack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrgencyThresholds {
    pub due_soon_days: i64,
    pub upcoming_days: i64,
}

impl Default for UrgencyThresholds {
    fn default() -> Self {
        Self {
            due_soon_days: 3,
            upcoming_days: 7,
        }
    }
}

pub fn classify(
    days_remaining: i64,
    late: bool,
    progress: u8,
    thresholds: &UrgencyThresholds,
) -> Urgency {
    if progress >= 100 {
        Urgency::Completed
    } else if late {
        Urgency::Overdue
    } else if days_remaining <= thresholds.due_soon_days {
        Urgency::DueSoon
    } else if days_remaining <= thresholds.upcoming_days {
        Urgency::Upcoming
    } else {
        Urgency::OnTrack
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadlineStatus {
    pub is_late: bool,
    pub days_remaining: i64,
    pub urgency: Urgency,
    pub color: String,
}

impl DeadlineStatus {
    pub fn compute(
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
        progress: u8,
        thresholds: &UrgencyThresholds,
    ) -> Self {
        let late = is_late(deadline, now);
        let days = days_remaining(deadline, now);
        let urgency = classify(days, late, progress, thresholds);
        Self {
            is_late: late,
            days_remaining: days,
            urgency,
            color: urgency.color().to_string(),
        }
    }
}

/// One member's share of an assignment. `user_id == None` is the bucket of
/// tasks nobody is assigned to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberProgress {
    pub user_id: Option<i64>,
    pub name: Option<String>,
    pub task_count: usize,
    pub completed_count: usize,
    pub completed_weight: i64,
    pub total_weight: i64,
    pub progress: u8,
}

impl MemberProgress {
    fn for_tasks(user_id: Option<i64>, name: Option<String>, tasks: &[&TaskWithAssignees]) -> Self {
        let (completed_weight, total_weight) = weight_totals(tasks.iter().copied());
        Self {
            user_id,
            name,
            task_count: tasks.len(),
            completed_count: tasks.iter().filter(|t| t.is_completed()).count(),
            completed_weight,
            total_weight,
            progress: percent(completed_weight, total_weight),
        }
    }
}

/// Weighted progress partitioned by assignee.
///
/// Members appear in the order given, followed by any task assignee who is
/// not a member (ascending id), followed by the unassigned bucket when at
/// least one task has no assignee.
pub fn member_progress(tasks: &[TaskWithAssignees], members: &[User]) -> Vec<MemberProgress> {
    let mut user_ids: Vec<i64> = members.iter().map(|m| m.id).collect();
    let mut extra: Vec<i64> = tasks
        .iter()
        .flat_map(|t| t.assignee_ids.iter().copied())
        .filter(|id| !user_ids.contains(id))
        .collect();
    extra.sort_unstable();
    extra.dedup();
    user_ids.extend(extra);

    let mut out: Vec<MemberProgress> = user_ids
        .into_iter()
        .map(|uid| {
            let name = members
                .iter()
                .find(|m| m.id == uid)
                .and_then(|m| m.name.clone());
            let owned: Vec<&TaskWithAssignees> = tasks
                .iter()
                .filter(|t| t.assignee_ids.contains(&uid))
                .collect();
            MemberProgress::for_tasks(Some(uid), name, &owned)
        })
        .collect();

    let unassigned: Vec<&TaskWithAssignees> =
        tasks.iter().filter(|t| t.assignee_ids.is_empty()).collect();
    if !unassigned.is_empty() {
        out.push(MemberProgress::for_tasks(None, None, &unassigned));
    }
    out
}

/// Split tasks into the board's status columns, each ordered by position.
pub fn group_by_status(tasks: Vec<TaskWithAssignees>) -> Vec<ColumnView> {
    TaskStatus::ALL
        .iter()
        .map(|status| {
            let mut col: Vec<TaskWithAssignees> = tasks
                .iter()
                .filter(|t| t.task.status == *status)
                .cloned()
                .collect();
            col.sort_by_key(|t| (t.task.position, t.task.id));
            ColumnView {
                status: *status,
                tasks: col,
            }
        })
        .collect()
}
