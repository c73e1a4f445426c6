use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{BoardDb, collect_rows};
use crate::errors::StudyError;
use crate::models::{
    Assignment, AssignmentDetail, AssignmentStatus, AssignmentSummary, BoardView,
};
use crate::progress::{self, DeadlineStatus, UrgencyThresholds};

const ASSIGNMENT_COLUMNS: &str = "id, title, description, weighting, deadline, progress, status, final_grade, creator_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub title: String,
    pub description: String,
    pub weighting: Option<i32>,
    pub deadline: DateTime<Utc>,
    pub final_grade: Option<f64>,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct AssignmentChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub weighting: Option<i32>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: Option<AssignmentStatus>,
    pub final_grade: Option<f64>,
}

fn validate_weighting(weighting: Option<i32>) -> Result<()> {
    match weighting {
        Some(w) if !(0..=100).contains(&w) => Err(StudyError::validation(format!(
            "weighting must be between 0 and 100, got {}",
            w
        ))
        .into()),
        _ => Ok(()),
    }
}

fn validate_grade(grade: Option<f64>) -> Result<()> {
    match grade {
        Some(g) if !(0.0..=100.0).contains(&g) => Err(StudyError::validation(format!(
            "final_grade must be between 0 and 100, got {}",
            g
        ))
        .into()),
        _ => Ok(()),
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(StudyError::validation("title must not be empty").into());
    }
    Ok(())
}

impl BoardDb {
    // ── Assignment CRUD ───────────────────────────────────────────────

    /// Insert an assignment and link its creator as the first assignee.
    pub fn create_assignment(&self, creator_id: i64, new: &NewAssignment) -> Result<Assignment> {
        validate_title(&new.title)?;
        validate_weighting(new.weighting)?;
        validate_grade(new.final_grade)?;
        if self.get_user(creator_id)?.is_none() {
            return Err(StudyError::not_found("User", creator_id).into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO assignments (title, description, weighting, deadline, final_grade, creator_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.title.trim(),
                new.description,
                new.weighting,
                new.deadline,
                new.final_grade,
                creator_id
            ],
        )
        .context("Failed to insert assignment")?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO assignment_assignees (assignment_id, user_id) VALUES (?1, ?2)",
            params![id, creator_id],
        )
        .context("Failed to link assignment creator")?;
        tx.commit().context("Failed to commit assignment insert")?;

        self.get_assignment(id)?
            .context("Assignment not found after insert")
    }

    pub fn get_assignment(&self, id: i64) -> Result<Option<Assignment>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?1"),
                params![id],
                AssignmentRow::from_row,
            )
            .optional()
            .context("Failed to query assignment")?;
        row.map(AssignmentRow::into_assignment).transpose()
    }

    /// Assignment by id, or `StudyError::NotFound`.
    pub fn require_assignment(&self, id: i64) -> Result<Assignment> {
        self.get_assignment(id)?
            .ok_or_else(|| StudyError::not_found("Assignment", id).into())
    }

    /// Assignments the user created or is assigned to, soonest deadline first.
    pub fn list_assignments_for_user(&self, user_id: i64) -> Result<Vec<Assignment>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                 WHERE creator_id = ?1
                    OR id IN (SELECT assignment_id FROM assignment_assignees WHERE user_id = ?1)
                 ORDER BY deadline, id"
            ))
            .context("Failed to prepare list_assignments_for_user")?;
        let rows = stmt
            .query_map(params![user_id], AssignmentRow::from_row)
            .context("Failed to query assignments")?;
        collect_rows(rows, "assignment")?
            .into_iter()
            .map(AssignmentRow::into_assignment)
            .collect()
    }

    pub fn update_assignment(&self, id: i64, changes: &AssignmentChanges) -> Result<Assignment> {
        if let Some(title) = &changes.title {
            validate_title(title)?;
        }
        validate_weighting(changes.weighting)?;
        validate_grade(changes.final_grade)?;

        let count = self
            .conn
            .execute(
                "UPDATE assignments SET
                    title = COALESCE(?1, title),
                    description = COALESCE(?2, description),
                    weighting = COALESCE(?3, weighting),
                    deadline = COALESCE(?4, deadline),
                    status = COALESCE(?5, status),
                    final_grade = COALESCE(?6, final_grade),
                    updated_at = datetime('now')
                 WHERE id = ?7",
                params![
                    changes.title.as_deref().map(str::trim),
                    changes.description,
                    changes.weighting,
                    changes.deadline,
                    changes.status.map(|s| s.as_str()),
                    changes.final_grade,
                    id
                ],
            )
            .context("Failed to update assignment")?;
        if count == 0 {
            return Err(StudyError::not_found("Assignment", id).into());
        }
        self.require_assignment(id)
    }

    /// Delete an assignment. Tasks and assignee links go with it through
    /// `ON DELETE CASCADE`.
    pub fn delete_assignment(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM assignments WHERE id = ?1", params![id])
            .context("Failed to delete assignment")?;
        Ok(count > 0)
    }

    /// True when the user created the assignment or is assigned to it.
    pub fn can_access_assignment(&self, user_id: i64, assignment_id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM assignments WHERE id = ?2 AND creator_id = ?1
                    UNION ALL
                    SELECT 1 FROM assignment_assignees WHERE assignment_id = ?2 AND user_id = ?1
                 )",
                params![user_id, assignment_id],
                |row| row.get(0),
            )
            .context("Failed to check assignment access")
    }

    /// Assignment the user may see, or `NotFound` (inaccessible assignments
    /// are indistinguishable from missing ones).
    pub fn accessible_assignment(&self, user_id: i64, assignment_id: i64) -> Result<Assignment> {
        if !self.can_access_assignment(user_id, assignment_id)? {
            return Err(StudyError::not_found("Assignment", assignment_id).into());
        }
        self.require_assignment(assignment_id)
    }

    /// Recompute stored progress from the assignment's tasks.
    pub fn refresh_progress(&self, assignment_id: i64) -> Result<u8> {
        let tasks = self.list_tasks_for_assignment(assignment_id)?;
        let pct = progress::calculate_progress(&tasks);
        self.conn
            .execute(
                "UPDATE assignments SET progress = ?1 WHERE id = ?2",
                params![pct, assignment_id],
            )
            .context("Failed to store assignment progress")?;
        Ok(pct)
    }

    // ── Views ─────────────────────────────────────────────────────────

    pub fn list_assignment_summaries(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        thresholds: &UrgencyThresholds,
    ) -> Result<Vec<AssignmentSummary>> {
        let mut out = Vec::new();
        for assignment in self.list_assignments_for_user(user_id)? {
            let tasks = self.list_tasks_for_assignment(assignment.id)?;
            let completed_count = tasks
                .iter()
                .filter(|t| progress::Weighted::is_completed(*t))
                .count();
            let deadline_status =
                DeadlineStatus::compute(assignment.deadline, now, assignment.progress, thresholds);
            out.push(AssignmentSummary {
                assignment,
                task_count: tasks.len(),
                completed_count,
                deadline_status,
            });
        }
        Ok(out)
    }

    pub fn get_assignment_detail(
        &self,
        id: i64,
        now: DateTime<Utc>,
        thresholds: &UrgencyThresholds,
    ) -> Result<Option<AssignmentDetail>> {
        let Some(assignment) = self.get_assignment(id)? else {
            return Ok(None);
        };
        let tasks = self.list_tasks_with_assignees(id)?;
        let assignees = self.list_users_for_assignment(id)?;
        let member_progress = progress::member_progress(&tasks, &assignees);
        let deadline_status =
            DeadlineStatus::compute(assignment.deadline, now, assignment.progress, thresholds);
        Ok(Some(AssignmentDetail {
            assignment,
            tasks,
            assignees,
            deadline_status,
            member_progress,
        }))
    }

    pub fn get_board(&self, assignment_id: i64) -> Result<BoardView> {
        let assignment = self.require_assignment(assignment_id)?;
        let tasks = self.list_tasks_with_assignees(assignment_id)?;
        Ok(BoardView {
            assignment,
            columns: progress::group_by_status(tasks),
        })
    }
}

/// Intermediate row struct for assignments.
struct AssignmentRow {
    id: i64,
    title: String,
    description: String,
    weighting: Option<i32>,
    deadline: DateTime<Utc>,
    progress: i64,
    status: String,
    final_grade: Option<f64>,
    creator_id: i64,
    created_at: String,
    updated_at: String,
}

impl AssignmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            weighting: row.get(3)?,
            deadline: row.get(4)?,
            progress: row.get(5)?,
            status: row.get(6)?,
            final_grade: row.get(7)?,
            creator_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_assignment(self) -> Result<Assignment> {
        let status = AssignmentStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse assignment status")?;
        Ok(Assignment {
            id: self.id,
            title: self.title,
            description: self.description,
            weighting: self.weighting,
            deadline: self.deadline,
            progress: self.progress.clamp(0, 100) as u8,
            status,
            final_grade: self.final_grade,
            creator_id: self.creator_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
