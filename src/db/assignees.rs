use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

use super::{BoardDb, collect_rows};
use crate::errors::StudyError;
use crate::models::Assignee;

/// The two junction tables share a shape; only the parent column differs.
#[derive(Debug, Clone, Copy)]
enum Link {
    Assignment,
    Task,
}

impl Link {
    fn table(self) -> &'static str {
        match self {
            Self::Assignment => "assignment_assignees",
            Self::Task => "task_assignees",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            Self::Assignment => "assignment_id",
            Self::Task => "task_id",
        }
    }
}

impl BoardDb {
    // ── Assignees ─────────────────────────────────────────────────────

    /// Link a user to an assignment. Linking twice returns the existing row.
    pub fn assign_user_to_assignment(&self, assignment_id: i64, user_id: i64) -> Result<Assignee> {
        self.require_assignment(assignment_id)?;
        self.link(Link::Assignment, assignment_id, user_id)
    }

    /// Link a user to a task. Linking twice returns the existing row.
    pub fn assign_user_to_task(&self, task_id: i64, user_id: i64) -> Result<Assignee> {
        self.require_task(task_id)?;
        self.link(Link::Task, task_id, user_id)
    }

    /// Remove a user from an assignment. The creator stays linked so they
    /// keep their row in the member breakdown.
    pub fn unassign_user_from_assignment(&self, assignment_id: i64, user_id: i64) -> Result<bool> {
        if let Some(assignment) = self.get_assignment(assignment_id)?
            && assignment.creator_id == user_id
        {
            return Err(
                StudyError::validation("the creator cannot be removed from an assignment").into(),
            );
        }
        self.unlink(Link::Assignment, assignment_id, user_id)
    }

    pub fn unassign_user_from_task(&self, task_id: i64, user_id: i64) -> Result<bool> {
        self.unlink(Link::Task, task_id, user_id)
    }

    pub fn list_assignment_assignees(&self, assignment_id: i64) -> Result<Vec<Assignee>> {
        self.links(Link::Assignment, assignment_id)
    }

    pub fn list_task_assignees(&self, task_id: i64) -> Result<Vec<Assignee>> {
        self.links(Link::Task, task_id)
    }

    fn link(&self, link: Link, parent_id: i64, user_id: i64) -> Result<Assignee> {
        if self.get_user(user_id)?.is_none() {
            return Err(StudyError::not_found("User", user_id).into());
        }
        let (table, parent) = (link.table(), link.parent_column());
        self.conn
            .execute(
                &format!("INSERT OR IGNORE INTO {table} ({parent}, user_id) VALUES (?1, ?2)"),
                params![parent_id, user_id],
            )
            .with_context(|| format!("Failed to insert into {}", table))?;
        self.find_link(link, parent_id, user_id)?
            .with_context(|| format!("{} row missing after insert", table))
    }

    fn find_link(&self, link: Link, parent_id: i64, user_id: i64) -> Result<Option<Assignee>> {
        let (table, parent) = (link.table(), link.parent_column());
        self.conn
            .query_row(
                &format!(
                    "SELECT id, {parent}, user_id, created_at FROM {table}
                     WHERE {parent} = ?1 AND user_id = ?2"
                ),
                params![parent_id, user_id],
                assignee_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query {}", table))
    }

    fn unlink(&self, link: Link, parent_id: i64, user_id: i64) -> Result<bool> {
        let (table, parent) = (link.table(), link.parent_column());
        let count = self
            .conn
            .execute(
                &format!("DELETE FROM {table} WHERE {parent} = ?1 AND user_id = ?2"),
                params![parent_id, user_id],
            )
            .with_context(|| format!("Failed to delete from {}", table))?;
        Ok(count > 0)
    }

    fn links(&self, link: Link, parent_id: i64) -> Result<Vec<Assignee>> {
        let (table, parent) = (link.table(), link.parent_column());
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, {parent}, user_id, created_at FROM {table}
                 WHERE {parent} = ?1 ORDER BY id"
            ))
            .with_context(|| format!("Failed to prepare {} lookup", table))?;
        let rows = stmt
            .query_map(params![parent_id], assignee_from_row)
            .with_context(|| format!("Failed to query {}", table))?;
        collect_rows(rows, "assignee")
    }
}

fn assignee_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Assignee> {
    Ok(Assignee {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        user_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}
