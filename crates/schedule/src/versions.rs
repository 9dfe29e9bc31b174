//! Schedule-version lifecycle: create, rename, scheduler/committee approval,
//! activation and deletion. The demote-then-promote updates run inside one
//! write transaction so the per-level uniqueness invariants hold under
//! concurrent callers.
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{Capability, Result, ScheduleDb, ScheduleError, SessionContext};

pub const MIN_LEVEL: i64 = 1;
pub const MAX_LEVEL: i64 = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRow {
    pub id: String,
    pub level: i64,
    pub student_count: Option<i64>,
    pub version_comment: Option<String>,
    /// Opaque JSON payload, preserved exactly as submitted.
    pub sections: serde_json::Value,
    pub is_active: bool,
    pub scheduler_approved: bool,
    pub committee_approved: bool,
    pub committee_comment: Option<String>,
    pub created_at: i64,
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<VersionRow> {
    let sections_raw: String = row.get(4)?;
    let sections = serde_json::from_str(&sections_raw)
        .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));
    Ok(VersionRow {
        id: row.get(0)?,
        level: row.get(1)?,
        student_count: row.get(2)?,
        version_comment: row.get(3)?,
        sections,
        is_active: row.get::<_, i64>(5)? != 0,
        scheduler_approved: row.get::<_, i64>(6)? != 0,
        committee_approved: row.get::<_, i64>(7)? != 0,
        committee_comment: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const VERSION_COLUMNS: &str = "id, level, student_count, version_comment, sections, \
     is_active, scheduler_approved, committee_approved, committee_comment, created_at";

pub(crate) fn validate_level(level: i64) -> Result<()> {
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        return Err(ScheduleError::InvalidInput(format!(
            "level must be between {MIN_LEVEL} and {MAX_LEVEL}, got {level}"
        )));
    }
    Ok(())
}

impl ScheduleDb {
    /// Insert a new draft version. Many drafts per level may coexist.
    pub fn create_version(
        &self,
        ctx: &SessionContext,
        level: i64,
        sections: &serde_json::Value,
        version_comment: Option<&str>,
        student_count: Option<i64>,
    ) -> Result<VersionRow> {
        ctx.require(Capability::Scheduler)?;
        validate_level(level)?;
        if !sections.is_array() {
            return Err(ScheduleError::InvalidInput(
                "sections must be a JSON array".into(),
            ));
        }
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        self.connection().execute(
            "INSERT INTO schedule_versions(id, level, student_count, version_comment, sections, created_at) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, level, student_count, version_comment, sections.to_string(), now],
        )?;
        self.get_version(&id)
    }

    pub fn get_version(&self, version_id: &str) -> Result<VersionRow> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM schedule_versions WHERE id = ?1 LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![version_id])?;
        if let Some(row) = rows.next()? {
            Ok(row_to_version(row)?)
        } else {
            Err(ScheduleError::NotFound(format!(
                "schedule version {version_id}"
            )))
        }
    }

    /// Overwrite the version label. The label must be non-empty after trimming.
    pub fn rename_version(&self, version_id: &str, new_comment: &str) -> Result<VersionRow> {
        let trimmed = new_comment.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::InvalidInput(
                "version name is required".into(),
            ));
        }
        let changed = self.connection().execute(
            "UPDATE schedule_versions SET version_comment = ?1 WHERE id = ?2",
            params![trimmed, version_id],
        )?;
        if changed == 0 {
            return Err(ScheduleError::NotFound(format!(
                "schedule version {version_id}"
            )));
        }
        self.get_version(version_id)
    }

    /// Scheduler forwards (or withdraws) a version for committee review.
    /// Touches only the scheduler_approved flag.
    pub fn scheduler_approve(
        &self,
        ctx: &SessionContext,
        version_id: &str,
        approved: bool,
    ) -> Result<VersionRow> {
        ctx.require(Capability::Scheduler)?;
        let changed = self.connection().execute(
            "UPDATE schedule_versions SET scheduler_approved = ?1 WHERE id = ?2",
            params![approved as i64, version_id],
        )?;
        if changed == 0 {
            return Err(ScheduleError::NotFound(format!(
                "schedule version {version_id}"
            )));
        }
        self.get_version(version_id)
    }

    /// Committee decision. Approving demotes every sibling at the same level
    /// and promotes the target; rejecting touches only the target. The comment
    /// is recorded on both outcomes, overwriting the previous one.
    pub fn committee_review(
        &self,
        ctx: &SessionContext,
        version_id: &str,
        approved: bool,
        comment: &str,
    ) -> Result<VersionRow> {
        ctx.require(Capability::LoadCommittee)?;
        let tx = self.begin_write_tx()?;
        let found: Option<(i64, bool)> = {
            let mut stmt = tx.prepare(
                "SELECT level, scheduler_approved FROM schedule_versions WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![version_id])?;
            match rows.next()? {
                Some(row) => Some((row.get(0)?, row.get::<_, i64>(1)? != 0)),
                None => None,
            }
        };
        let Some((level, scheduler_approved)) = found else {
            return Err(ScheduleError::NotFound(format!(
                "schedule version {version_id}"
            )));
        };
        if approved && !scheduler_approved {
            // Permitted, but worth surfacing: the scheduler step was skipped.
            warn!(version = version_id, level, "committee approving a version the scheduler never forwarded");
        }
        if approved {
            tx.execute(
                "UPDATE schedule_versions SET committee_approved = 0 WHERE level = ?1",
                params![level],
            )?;
        }
        tx.execute(
            "UPDATE schedule_versions SET committee_approved = ?1, committee_comment = ?2 WHERE id = ?3",
            params![approved as i64, comment, version_id],
        )?;
        tx.commit()?;
        self.get_version(version_id)
    }

    /// Make the target the single active version for its level.
    pub fn activate_version(&self, ctx: &SessionContext, version_id: &str) -> Result<VersionRow> {
        ctx.require(Capability::Scheduler)?;
        let tx = self.begin_write_tx()?;
        let level: Option<i64> = {
            let mut stmt = tx.prepare("SELECT level FROM schedule_versions WHERE id = ?1")?;
            let mut rows = stmt.query(params![version_id])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        let Some(level) = level else {
            return Err(ScheduleError::NotFound(format!(
                "schedule version {version_id}"
            )));
        };
        tx.execute(
            "UPDATE schedule_versions SET is_active = 0 WHERE level = ?1",
            params![level],
        )?;
        tx.execute(
            "UPDATE schedule_versions SET is_active = 1 WHERE id = ?1",
            params![version_id],
        )?;
        tx.commit()?;
        self.get_version(version_id)
    }

    /// Remove a version. The active version cannot be deleted; activate a
    /// replacement first.
    pub fn delete_version(&self, ctx: &SessionContext, version_id: &str) -> Result<()> {
        ctx.require(Capability::Scheduler)?;
        let tx = self.begin_write_tx()?;
        let active: Option<bool> = {
            let mut stmt = tx.prepare("SELECT is_active FROM schedule_versions WHERE id = ?1")?;
            let mut rows = stmt.query(params![version_id])?;
            match rows.next()? {
                Some(row) => Some(row.get::<_, i64>(0)? != 0),
                None => None,
            }
        };
        match active {
            None => {
                return Err(ScheduleError::NotFound(format!(
                    "schedule version {version_id}"
                )))
            }
            Some(true) => {
                return Err(ScheduleError::Conflict(format!(
                    "schedule version {version_id} is active and cannot be deleted"
                )))
            }
            Some(false) => {}
        }
        tx.execute(
            "DELETE FROM schedule_versions WHERE id = ?1",
            params![version_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All versions for a level, newest first.
    pub fn list_by_level(&self, level: i64) -> Result<Vec<VersionRow>> {
        validate_level(level)?;
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM schedule_versions WHERE level = ?1 ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map(params![level], |row| row_to_version(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Committee work list: forwarded versions plus whatever is currently
    /// active, so an active version can be re-reviewed.
    pub fn list_pending_for_committee(&self, ctx: &SessionContext) -> Result<Vec<VersionRow>> {
        ctx.require(Capability::LoadCommittee)?;
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM schedule_versions \
             WHERE scheduler_approved = 1 OR is_active = 1 \
             ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map([], |row| row_to_version(row))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Read model consumed by faculty: committee-approved versions only.
    pub fn list_approved(&self, level: Option<i64>) -> Result<Vec<VersionRow>> {
        if let Some(level) = level {
            validate_level(level)?;
        }
        let mut out = Vec::new();
        match level {
            Some(level) => {
                let mut stmt = self.connection().prepare(&format!(
                    "SELECT {VERSION_COLUMNS} FROM schedule_versions \
                     WHERE committee_approved = 1 AND level = ?1 ORDER BY created_at DESC, id"
                ))?;
                let rows = stmt.query_map(params![level], |row| row_to_version(row))?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = self.connection().prepare(&format!(
                    "SELECT {VERSION_COLUMNS} FROM schedule_versions \
                     WHERE committee_approved = 1 ORDER BY created_at DESC, id"
                ))?;
                let rows = stmt.query_map([], |row| row_to_version(row))?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    }

    /// The published schedule students see: active and committee approved.
    pub fn active_schedule(&self, level: i64) -> Result<Option<VersionRow>> {
        validate_level(level)?;
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM schedule_versions \
             WHERE level = ?1 AND is_active = 1 AND committee_approved = 1 LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![level])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_version(row)?))
        } else {
            Ok(None)
        }
    }
}
