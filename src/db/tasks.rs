use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{BoardDb, collect_rows};
use crate::errors::StudyError;
use crate::models::{Task, TaskPriority, TaskStatus, TaskWithAssignees};

const TASK_COLUMNS: &str = "id, assignment_id, title, description, status, priority, due_date, weighting, position, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewTask {
    pub assignment_id: i64,
    pub title: String,
    pub description: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub weighting: Option<i32>,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub weighting: Option<i32>,
}

/// Filters for `list_tasks`; every field is optional and they combine with AND.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub assignment_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<i64>,
    /// Restrict to assignments this user created or is assigned to.
    pub visible_to: Option<i64>,
}

fn validate_task_weighting(weighting: Option<i32>) -> Result<()> {
    match weighting {
        Some(w) if w < 0 => Err(StudyError::validation(format!(
            "weighting must not be negative, got {}",
            w
        ))
        .into()),
        _ => Ok(()),
    }
}

impl BoardDb {
    // ── Task CRUD ─────────────────────────────────────────────────────

    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(StudyError::validation("title must not be empty").into());
        }
        validate_task_weighting(new.weighting)?;
        self.require_assignment(new.assignment_id)?;

        let status = new.status.unwrap_or(TaskStatus::ToDo);
        let priority = new.priority.unwrap_or(TaskPriority::Medium);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let position = self.next_position(new.assignment_id, status)?;
        tx.execute(
            "INSERT INTO tasks (assignment_id, title, description, status, priority, due_date, weighting, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.assignment_id,
                new.title.trim(),
                new.description,
                status.as_str(),
                priority.as_str(),
                new.due_date,
                new.weighting,
                position
            ],
        )
        .context("Failed to insert task")?;
        let id = tx.last_insert_rowid();
        self.refresh_progress(new.assignment_id)?;
        tx.commit().context("Failed to commit task insert")?;

        self.get_task(id)?.context("Task not found after insert")
    }

    fn next_position(&self, assignment_id: i64, status: TaskStatus) -> Result<i32> {
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM tasks WHERE assignment_id = ?1 AND status = ?2",
                params![assignment_id, status.as_str()],
                |row| row.get(0),
            )
            .context("Failed to get max position")?;
        Ok(max_pos + 1)
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    pub fn require_task(&self, id: i64) -> Result<Task> {
        self.get_task(id)?
            .ok_or_else(|| StudyError::not_found("Task", id).into())
    }

    /// Task the user may see through its assignment, or `NotFound`.
    pub fn accessible_task(&self, user_id: i64, id: i64) -> Result<Task> {
        let task = self.require_task(id)?;
        if !self.can_access_assignment(user_id, task.assignment_id)? {
            return Err(StudyError::not_found("Task", id).into());
        }
        Ok(task)
    }

    pub fn list_tasks_for_assignment(&self, assignment_id: i64) -> Result<Vec<Task>> {
        self.list_tasks(&TaskFilter {
            assignment_id: Some(assignment_id),
            ..Default::default()
        })
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE (?1 IS NULL OR assignment_id = ?1)
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL OR id IN (SELECT task_id FROM task_assignees WHERE user_id = ?3))
                   AND (?4 IS NULL OR assignment_id IN (
                        SELECT id FROM assignments WHERE creator_id = ?4
                        UNION SELECT assignment_id FROM assignment_assignees WHERE user_id = ?4))
                 ORDER BY assignment_id, position, id"
            ))
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(
                params![
                    filter.assignment_id,
                    filter.status.map(|s| s.as_str()),
                    filter.assignee_id,
                    filter.visible_to
                ],
                TaskRow::from_row,
            )
            .context("Failed to query tasks")?;
        collect_rows(rows, "task")?
            .into_iter()
            .map(TaskRow::into_task)
            .collect()
    }

    /// Tasks of one assignment paired with their assignee ids.
    pub fn list_tasks_with_assignees(&self, assignment_id: i64) -> Result<Vec<TaskWithAssignees>> {
        let tasks = self.list_tasks_for_assignment(assignment_id)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT ta.task_id, ta.user_id FROM task_assignees ta
                 JOIN tasks t ON t.id = ta.task_id
                 WHERE t.assignment_id = ?1 ORDER BY ta.id",
            )
            .context("Failed to prepare task assignee lookup")?;
        let rows = stmt
            .query_map(params![assignment_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })
            .context("Failed to query task assignees")?;
        let mut by_task: HashMap<i64, Vec<i64>> = HashMap::new();
        for (task_id, user_id) in collect_rows(rows, "task_assignee")? {
            by_task.entry(task_id).or_default().push(user_id);
        }

        Ok(tasks
            .into_iter()
            .map(|task| {
                let assignee_ids = by_task.remove(&task.id).unwrap_or_default();
                TaskWithAssignees { task, assignee_ids }
            })
            .collect())
    }

    pub fn update_task(&self, id: i64, changes: &TaskChanges) -> Result<Task> {
        if let Some(title) = &changes.title
            && title.trim().is_empty()
        {
            return Err(StudyError::validation("title must not be empty").into());
        }
        validate_task_weighting(changes.weighting)?;
        let existing = self.require_task(id)?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        // A status change without an explicit position lands at the end of
        // the new column.
        let position = match changes.status {
            Some(status) if status != existing.status => {
                Some(self.next_position(existing.assignment_id, status)?)
            }
            _ => None,
        };
        if position.is_some() {
            tx.execute(
                "UPDATE tasks SET position = position - 1
                 WHERE assignment_id = ?1 AND status = ?2 AND position > ?3",
                params![
                    existing.assignment_id,
                    existing.status.as_str(),
                    existing.position
                ],
            )
            .context("Failed to close source column gap")?;
        }

        tx.execute(
            "UPDATE tasks SET
                title = COALESCE(?1, title),
                description = COALESCE(?2, description),
                status = COALESCE(?3, status),
                priority = COALESCE(?4, priority),
                due_date = COALESCE(?5, due_date),
                weighting = COALESCE(?6, weighting),
                position = COALESCE(?7, position),
                updated_at = datetime('now')
             WHERE id = ?8",
            params![
                changes.title.as_deref().map(str::trim),
                changes.description,
                changes.status.map(|s| s.as_str()),
                changes.priority.map(|p| p.as_str()),
                changes.due_date,
                changes.weighting,
                position,
                id
            ],
        )
        .context("Failed to update task")?;
        self.refresh_progress(existing.assignment_id)?;
        tx.commit().context("Failed to commit task update")?;

        self.require_task(id)
    }

    /// Move a task to `status` at `position`, shifting the other cards in
    /// both columns so positions stay dense.
    pub fn move_task(&self, id: i64, status: TaskStatus, position: i32) -> Result<Task> {
        let existing = self.require_task(id)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        // Close the gap in the source column.
        tx.execute(
            "UPDATE tasks SET position = position - 1
             WHERE assignment_id = ?1 AND status = ?2 AND position > ?3 AND id != ?4",
            params![
                existing.assignment_id,
                existing.status.as_str(),
                existing.position,
                id
            ],
        )
        .context("Failed to close source column gap")?;

        let column_len: i32 = tx
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE assignment_id = ?1 AND status = ?2 AND id != ?3",
                params![existing.assignment_id, status.as_str(), id],
                |row| row.get(0),
            )
            .context("Failed to count target column")?;
        let position = position.clamp(0, column_len);

        // Open a slot in the target column.
        tx.execute(
            "UPDATE tasks SET position = position + 1
             WHERE assignment_id = ?1 AND status = ?2 AND position >= ?3 AND id != ?4",
            params![existing.assignment_id, status.as_str(), position, id],
        )
        .context("Failed to open target column slot")?;

        tx.execute(
            "UPDATE tasks SET status = ?1, position = ?2, updated_at = datetime('now') WHERE id = ?3",
            params![status.as_str(), position, id],
        )
        .context("Failed to move task")?;
        self.refresh_progress(existing.assignment_id)?;
        tx.commit().context("Failed to commit task move")?;

        self.require_task(id)
    }

    /// Delete a task and return it, or `None` when it did not exist.
    pub fn delete_task(&self, id: i64) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        tx.execute(
            "UPDATE tasks SET position = position - 1
             WHERE assignment_id = ?1 AND status = ?2 AND position > ?3",
            params![task.assignment_id, task.status.as_str(), task.position],
        )
        .context("Failed to close column gap")?;
        self.refresh_progress(task.assignment_id)?;
        tx.commit().context("Failed to commit task delete")?;
        Ok(Some(task))
    }
}

/// Intermediate row struct for tasks.
struct TaskRow {
    id: i64,
    assignment_id: i64,
    title: String,
    description: String,
    status: String,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    weighting: Option<i32>,
    position: i32,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            assignment_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            due_date: row.get(6)?,
            weighting: row.get(7)?,
            position: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        let priority = TaskPriority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task priority")?;
        Ok(Task {
            id: self.id,
            assignment_id: self.assignment_id,
            title: self.title,
            description: self.description,
            status,
            priority,
            due_date: self.due_date,
            weighting: self.weighting,
            position: self.position,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{assignment, deadline_in, user};

    fn new_task(assignment_id: i64, title: &str) -> NewTask {
        NewTask {
            assignment_id,
            title: title.to_string(),
            description: String::new(),
            status: None,
            priority: None,
            due_date: None,
            weighting: None,
        }
    }

    fn positions(db: &BoardDb, assignment_id: i64, status: TaskStatus) -> Vec<(String, i32)> {
        db.list_tasks(&TaskFilter {
            assignment_id: Some(assignment_id),
            status: Some(status),
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|t| (t.title, t.position))
        .collect()
    }

    #[test]
    fn test_create_task_defaults_and_positions() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let a = assignment(&db, &ada, "Essay");

        let t1 = db.create_task(&new_task(a.id, "Research"))?;
        let t2 = db.create_task(&NewTask {
            priority: Some(TaskPriority::High),
            due_date: Some(deadline_in(2)),
            weighting: Some(5),
            ..new_task(a.id, "Write")
        })?;
        assert_eq!(t1.status, TaskStatus::ToDo);
        assert_eq!(t1.priority, TaskPriority::Medium);
        assert_eq!(t1.position, 0);
        assert_eq!(t2.position, 1);
        assert_eq!(t2.weighting, Some(5));
        assert!(t2.due_date.is_some());
        Ok(())
    }

    #[test]
    fn test_create_task_requires_existing_assignment() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_task(&new_task(42, "Orphan")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudyError>(),
            Some(StudyError::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_create_task_rejects_negative_weighting() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let a = assignment(&db, &ada, "Essay");
        let err = db
            .create_task(&NewTask {
                weighting: Some(-2),
                ..new_task(a.id, "Bad")
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudyError>(),
            Some(StudyError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_list_tasks_filters() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let bob = user(&db, "bob@uni.test");
        let essay = assignment(&db, &ada, "Essay");
        let lab = assignment(&db, &bob, "Lab");
        let t1 = db.create_task(&new_task(essay.id, "Research"))?;
        db.create_task(&new_task(essay.id, "Write"))?;
        db.create_task(&new_task(lab.id, "Measure"))?;
        db.assign_user_to_task(t1.id, bob.id)?;

        assert_eq!(db.list_tasks(&TaskFilter::default())?.len(), 3);
        let bobs = db.list_tasks(&TaskFilter {
            assignee_id: Some(bob.id),
            ..Default::default()
        })?;
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].id, t1.id);

        let visible = db.list_tasks(&TaskFilter {
            visible_to: Some(ada.id),
            ..Default::default()
        })?;
        assert_eq!(visible.len(), 2);
        Ok(())
    }

    #[test]
    fn test_update_task_status_moves_to_end_of_column() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let a = assignment(&db, &ada, "Essay");
        let t1 = db.create_task(&new_task(a.id, "One"))?;
        let t2 = db.create_task(&new_task(a.id, "Two"))?;
        db.move_task(t2.id, TaskStatus::Completed, 0)?;

        let updated = db.update_task(
            t1.id,
            &TaskChanges {
                status: Some(TaskStatus::Completed),
                title: Some("One (done)".to_string()),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.position, 1);
        assert_eq!(updated.title, "One (done)");
        assert_eq!(db.require_assignment(a.id)?.progress, 100);
        Ok(())
    }

    #[test]
    fn test_move_task_reorders_columns() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let a = assignment(&db, &ada, "Essay");
        let t_a = db.create_task(&new_task(a.id, "A"))?;
        db.create_task(&new_task(a.id, "B"))?;
        let t_c = db.create_task(&new_task(a.id, "C"))?;

        // Reorder within the same column: C to the top
        db.move_task(t_c.id, TaskStatus::ToDo, 0)?;
        assert_eq!(
            positions(&db, a.id, TaskStatus::ToDo),
            vec![("C".into(), 0), ("A".into(), 1), ("B".into(), 2)]
        );

        // Move A into another column; the source column closes the gap
        let moved = db.move_task(t_a.id, TaskStatus::InProgress, 5)?;
        assert_eq!(moved.status, TaskStatus::InProgress);
        assert_eq!(moved.position, 0, "position is clamped to column length");
        assert_eq!(
            positions(&db, a.id, TaskStatus::ToDo),
            vec![("C".into(), 0), ("B".into(), 1)]
        );
        Ok(())
    }

    #[test]
    fn test_board_groups_by_status() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let a = assignment(&db, &ada, "Essay");
        let t1 = db.create_task(&new_task(a.id, "One"))?;
        db.create_task(&new_task(a.id, "Two"))?;
        db.move_task(t1.id, TaskStatus::InProgress, 0)?;

        let board = db.get_board(a.id)?;
        assert_eq!(board.columns.len(), 3);
        assert_eq!(board.columns[0].tasks.len(), 1);
        assert_eq!(board.columns[1].tasks.len(), 1);
        assert_eq!(board.columns[1].tasks[0].task.id, t1.id);
        assert!(board.columns[2].tasks.is_empty());
        Ok(())
    }

    /// Make every progress write fail so the last step of a task mutation errors.
    fn break_progress_writes(db: &BoardDb) -> Result<()> {
        db.conn.execute_batch(
            "CREATE TRIGGER reject_progress BEFORE UPDATE OF progress ON assignments
             BEGIN SELECT RAISE(ABORT, 'progress write rejected'); END;",
        )?;
        Ok(())
    }

    #[test]
    fn test_failed_progress_refresh_rolls_back_task_writes() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let a = assignment(&db, &ada, "Essay");
        let t1 = db.create_task(&new_task(a.id, "One"))?;
        db.create_task(&new_task(a.id, "Two"))?;
        let before = positions(&db, a.id, TaskStatus::ToDo);
        break_progress_writes(&db)?;

        assert!(db.create_task(&new_task(a.id, "Three")).is_err());
        assert!(
            db.update_task(
                t1.id,
                &TaskChanges {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )
            .is_err()
        );
        assert!(db.move_task(t1.id, TaskStatus::InProgress, 0).is_err());
        assert!(db.delete_task(t1.id).is_err());

        assert_eq!(positions(&db, a.id, TaskStatus::ToDo), before);
        assert!(positions(&db, a.id, TaskStatus::Completed).is_empty());
        assert!(positions(&db, a.id, TaskStatus::InProgress).is_empty());
        assert_eq!(db.require_task(t1.id)?.status, TaskStatus::ToDo);
        Ok(())
    }

    #[test]
    fn test_delete_task_returns_removed_row() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada@uni.test");
        let a = assignment(&db, &ada, "Essay");
        let t = db.create_task(&new_task(a.id, "Gone"))?;
        let removed = db.delete_task(t.id)?.expect("task should be deleted");
        assert_eq!(removed.id, t.id);
        assert!(db.delete_task(t.id)?.is_none());
        Ok(())
    }
}
