//! Accepted scheduling rules. Drafted collaboratively in the shared pad,
//! persisted here once adopted, and fed to the proposer as constraints.
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Capability, Result, ScheduleDb, ScheduleError, SessionContext};

pub const RULE_TEXT_MAX: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRow {
    pub rule_id: String,
    pub text: String,
    pub created_at: i64,
}

impl ScheduleDb {
    pub fn list_rules(&self) -> Result<Vec<RuleRow>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT rule_id, text, created_at FROM rules ORDER BY created_at, rule_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(RuleRow {
                rule_id: row.get(0)?,
                text: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn add_rule(&self, ctx: &SessionContext, text: &str) -> Result<RuleRow> {
        ctx.require(Capability::Scheduler)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::InvalidInput("rule text is required".into()));
        }
        if trimmed.chars().count() > RULE_TEXT_MAX {
            return Err(ScheduleError::InvalidInput(format!(
                "rule text exceeds {RULE_TEXT_MAX} characters"
            )));
        }
        let rule_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        self.connection().execute(
            "INSERT INTO rules(rule_id, text, created_at) VALUES(?1, ?2, ?3)",
            params![rule_id, trimmed, now],
        )?;
        Ok(RuleRow {
            rule_id,
            text: trimmed.to_string(),
            created_at: now,
        })
    }

    pub fn delete_rule(&self, ctx: &SessionContext, rule_id: &str) -> Result<()> {
        ctx.require(Capability::Scheduler)?;
        let changed = self
            .connection()
            .execute("DELETE FROM rules WHERE rule_id = ?1", params![rule_id])?;
        if changed == 0 {
            return Err(ScheduleError::NotFound(format!("rule {rule_id}")));
        }
        Ok(())
    }
}
