use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{BoardDb, collect_rows};
use crate::errors::StudyError;
use crate::models::{Session, User};

const USER_COLUMNS: &str = "id, name, email, email_verified, image, role, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        email_verified: row.get(3)?,
        image: row.get(4)?,
        role: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Lower-cased, trimmed email; rejects anything without a local part and domain.
pub(crate) fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(StudyError::validation(format!("Invalid email address: '{}'", email)).into()),
    }
}

impl BoardDb {
    // ── User CRUD ─────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        name: Option<&str>,
        email: &str,
        image: Option<&str>,
        role: Option<&str>,
    ) -> Result<User> {
        let email = normalize_email(email)?;
        if self.get_user_by_email(&email)?.is_some() {
            return Err(
                StudyError::validation(format!("Email {} is already registered", email)).into(),
            );
        }
        self.conn
            .execute(
                "INSERT INTO users (name, email, image, role) VALUES (?1, ?2, ?3, COALESCE(?4, 'student'))",
                params![name, email, image, role],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map([], user_from_row)
            .context("Failed to query users")?;
        collect_rows(rows, "user")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by email")
    }

    /// Users linked to an assignment, in the order they were assigned.
    pub fn list_users_for_assignment(&self, assignment_id: i64) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.name, u.email, u.email_verified, u.image, u.role, u.created_at
                 FROM users u JOIN assignment_assignees aa ON aa.user_id = u.id
                 WHERE aa.assignment_id = ?1 ORDER BY aa.id",
            )
            .context("Failed to prepare list_users_for_assignment")?;
        let rows = stmt
            .query_map(params![assignment_id], user_from_row)
            .context("Failed to query assignment users")?;
        collect_rows(rows, "user")
    }

    pub fn update_user(
        &self,
        id: i64,
        name: Option<&str>,
        image: Option<&str>,
        role: Option<&str>,
    ) -> Result<User> {
        let count = self
            .conn
            .execute(
                "UPDATE users SET name = COALESCE(?1, name), image = COALESCE(?2, image), role = COALESCE(?3, role)
                 WHERE id = ?4",
                params![name, image, role, id],
            )
            .context("Failed to update user")?;
        if count == 0 {
            return Err(StudyError::not_found("User", id).into());
        }
        self.get_user(id)?.context("User not found after update")
    }

    pub fn mark_email_verified(&self, id: i64, at: DateTime<Utc>) -> Result<User> {
        self.conn
            .execute(
                "UPDATE users SET email_verified = ?1 WHERE id = ?2",
                params![at, id],
            )
            .context("Failed to mark email verified")?;
        self.get_user(id)?
            .ok_or_else(|| StudyError::not_found("User", id).into())
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_session(
        &self,
        user_id: i64,
        token_hash: &str,
        expires: DateTime<Utc>,
    ) -> Result<Session> {
        self.conn
            .execute(
                "INSERT INTO sessions (user_id, token_hash, expires) VALUES (?1, ?2, ?3)",
                params![user_id, token_hash, expires],
            )
            .context("Failed to insert session")?;
        Ok(Session {
            id: self.conn.last_insert_rowid(),
            user_id,
            expires,
        })
    }

    /// Look up a live session by token hash. Expired sessions are removed and
    /// reported as absent.
    pub fn find_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(Session, User)>> {
        let session = self
            .conn
            .query_row(
                "SELECT id, user_id, expires FROM sessions WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        expires: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query session")?;
        let Some(session) = session else {
            return Ok(None);
        };
        if session.expires <= now {
            self.conn
                .execute("DELETE FROM sessions WHERE id = ?1", params![session.id])
                .context("Failed to delete expired session")?;
            return Ok(None);
        }
        let user = self
            .get_user(session.user_id)?
            .context("Session refers to a missing user")?;
        Ok(Some((session, user)))
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM sessions WHERE token_hash = ?1",
                params![token_hash],
            )
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    // ── Verification tokens ───────────────────────────────────────────

    pub fn create_verification_token(
        &self,
        identifier: &str,
        token_hash: &str,
        expires: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO verification_tokens (identifier, token_hash, expires) VALUES (?1, ?2, ?3)",
                params![identifier, token_hash, expires],
            )
            .context("Failed to insert verification token")?;
        Ok(())
    }

    /// Delete the token and report whether it was present and unexpired.
    /// Tokens are single-use either way.
    pub fn consume_verification_token(
        &self,
        identifier: &str,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expires: Option<DateTime<Utc>> = self
            .conn
            .query_row(
                "SELECT expires FROM verification_tokens WHERE identifier = ?1 AND token_hash = ?2",
                params![identifier, token_hash],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query verification token")?;
        let Some(expires) = expires else {
            return Ok(false);
        };
        self.conn
            .execute(
                "DELETE FROM verification_tokens WHERE identifier = ?1 AND token_hash = ?2",
                params![identifier, token_hash],
            )
            .context("Failed to delete verification token")?;
        Ok(expires > now)
    }
}
