use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{BoardDb, collect_rows};
use crate::errors::StudyError;
use crate::models::{Group, GroupDetail, GroupMember};

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<GroupMember> {
    Ok(GroupMember {
        id: row.get(0)?,
        group_id: row.get(1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl BoardDb {
    // ── Groups ────────────────────────────────────────────────────────

    pub fn create_group(&self, name: &str, description: &str) -> Result<Group> {
        if name.trim().is_empty() {
            return Err(StudyError::validation("name must not be empty").into());
        }
        self.conn
            .execute(
                "INSERT INTO study_groups (name, description) VALUES (?1, ?2)",
                params![name.trim(), description],
            )
            .context("Failed to insert group")?;
        let id = self.conn.last_insert_rowid();
        self.get_group(id)?.context("Group not found after insert")
    }

    pub fn get_group(&self, id: i64) -> Result<Option<Group>> {
        self.conn
            .query_row(
                "SELECT id, name, description, created_at FROM study_groups WHERE id = ?1",
                params![id],
                group_from_row,
            )
            .optional()
            .context("Failed to query group")
    }

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description, created_at FROM study_groups ORDER BY id")
            .context("Failed to prepare list_groups")?;
        let rows = stmt
            .query_map([], group_from_row)
            .context("Failed to query groups")?;
        collect_rows(rows, "group")
    }

    pub fn get_group_detail(&self, id: i64) -> Result<GroupDetail> {
        let group = self
            .get_group(id)?
            .ok_or_else(|| StudyError::not_found("Group", id))?;
        let members = self.list_group_members(id)?;
        Ok(GroupDetail { group, members })
    }

    /// Delete a group; memberships cascade.
    pub fn delete_group(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM study_groups WHERE id = ?1", params![id])
            .context("Failed to delete group")?;
        Ok(count > 0)
    }

    // ── Members ───────────────────────────────────────────────────────

    /// Add a member. Adding an existing member returns the existing row
    /// unchanged.
    pub fn add_group_member(
        &self,
        group_id: i64,
        user_id: i64,
        role: Option<&str>,
    ) -> Result<GroupMember> {
        if self.get_group(group_id)?.is_none() {
            return Err(StudyError::not_found("Group", group_id).into());
        }
        if self.get_user(user_id)?.is_none() {
            return Err(StudyError::not_found("User", user_id).into());
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role)
                 VALUES (?1, ?2, COALESCE(?3, 'member'))",
                params![group_id, user_id, role],
            )
            .context("Failed to insert group member")?;
        self.conn
            .query_row(
                "SELECT id, group_id, user_id, role, created_at FROM group_members
                 WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
                member_from_row,
            )
            .context("Group member missing after insert")
    }

    pub fn remove_group_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
            )
            .context("Failed to delete group member")?;
        Ok(count > 0)
    }

    pub fn list_group_members(&self, group_id: i64) -> Result<Vec<GroupMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, group_id, user_id, role, created_at FROM group_members
                 WHERE group_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_group_members")?;
        let rows = stmt
            .query_map(params![group_id], member_from_row)
            .context("Failed to query group members")?;
        collect_rows(rows, "group member")
    }
}
