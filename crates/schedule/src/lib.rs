//! Schedule-version store and approval workflow for SmartSchedule.
//! Versions move draft -> scheduler-approved -> committee-approved/rejected,
//! with an exclusive active flag per level.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

mod db;
pub use db::*;

mod versions;
pub use versions::*;

mod comments;
pub use comments::*;

mod rules;
pub use rules::*;

mod proposer;
pub use proposer::*;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0} capability required")]
    Forbidden(Capability),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("schedule proposer failed: {0}")]
    UpstreamGenerationFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Closed set of capabilities resolved once at authentication time.
/// Never matched against role strings downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Scheduler,
    LoadCommittee,
    Faculty,
    Student,
    Admin,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::Scheduler => "scheduler",
            Capability::LoadCommittee => "load_committee",
            Capability::Faculty => "faculty",
            Capability::Student => "student",
            Capability::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Explicit per-request session context. Operations take this instead of
/// consulting any ambient user state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: String,
    capabilities: HashSet<Capability>,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            user_id: user_id.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability) || self.capabilities.contains(&Capability::Admin)
    }

    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(ScheduleError::Forbidden(capability))
        }
    }
}
