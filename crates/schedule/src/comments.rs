//! Append-only feedback on schedule versions. Student comments feed the
//! committee notifications view; faculty comments feed the scheduler view.
//! Exactly one of student_id/user_id is set per row.
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Capability, Result, ScheduleDb, ScheduleError, SessionContext};

pub const STUDENT_COMMENT_MAX: usize = 500;
pub const FACULTY_COMMENT_MAX: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: String,
    pub schedule_version_id: String,
    pub student_id: Option<String>,
    pub user_id: Option<String>,
    pub comment: String,
    pub created_at: i64,
}

/// Which half of the channel to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentChannel {
    Student,
    Faculty,
}

fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        schedule_version_id: row.get(1)?,
        student_id: row.get(2)?,
        user_id: row.get(3)?,
        comment: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const COMMENT_COLUMNS: &str =
    "id, schedule_version_id, student_id, user_id, comment, created_at";

fn validate_comment_text(text: &str, max_len: usize) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ScheduleError::InvalidInput("comment is required".into()));
    }
    if trimmed.chars().count() > max_len {
        return Err(ScheduleError::InvalidInput(format!(
            "comment exceeds {max_len} characters"
        )));
    }
    Ok(trimmed.to_string())
}

impl ScheduleDb {
    fn insert_comment(
        &self,
        version_id: &str,
        student_id: Option<&str>,
        user_id: Option<&str>,
        text: &str,
    ) -> Result<CommentRow> {
        // Surface a missing version as NotFound rather than an FK failure.
        self.get_version(version_id)?;
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        self.connection().execute(
            "INSERT INTO comments(id, schedule_version_id, student_id, user_id, comment, created_at) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, version_id, student_id, user_id, text, now],
        )?;
        self.get_comment(&id)
    }

    pub fn add_student_comment(
        &self,
        ctx: &SessionContext,
        student_id: &str,
        version_id: &str,
        text: &str,
    ) -> Result<CommentRow> {
        ctx.require(Capability::Student)?;
        let text = validate_comment_text(text, STUDENT_COMMENT_MAX)?;
        self.insert_comment(version_id, Some(student_id), None, &text)
    }

    pub fn add_faculty_comment(
        &self,
        ctx: &SessionContext,
        version_id: &str,
        text: &str,
    ) -> Result<CommentRow> {
        ctx.require(Capability::Faculty)?;
        let text = validate_comment_text(text, FACULTY_COMMENT_MAX)?;
        self.insert_comment(version_id, None, Some(&ctx.user_id), &text)
    }

    pub fn get_comment(&self, comment_id: &str) -> Result<CommentRow> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1 LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![comment_id])?;
        if let Some(row) = rows.next()? {
            Ok(row_to_comment(row)?)
        } else {
            Err(ScheduleError::NotFound(format!("comment {comment_id}")))
        }
    }

    pub fn list_comments_for_version(
        &self,
        version_id: &str,
        channel: CommentChannel,
    ) -> Result<Vec<CommentRow>> {
        let filter = match channel {
            CommentChannel::Student => "user_id IS NULL",
            CommentChannel::Faculty => "user_id IS NOT NULL",
        };
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments \
             WHERE schedule_version_id = ?1 AND {filter} ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map(params![version_id], |row| row_to_comment(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Faculty view of their own comments on a version.
    pub fn list_my_comments_for_version(
        &self,
        ctx: &SessionContext,
        version_id: &str,
    ) -> Result<Vec<CommentRow>> {
        ctx.require(Capability::Faculty)?;
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments \
             WHERE schedule_version_id = ?1 AND user_id = ?2 ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map(params![version_id, ctx.user_id], |row| row_to_comment(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
