//! Seam to the external schedule generator. The proposer receives the current
//! sections, the adopted rules and a natural-language command, and returns a
//! candidate section list. A failed proposal never touches stored versions;
//! persisting a candidate goes through `create_version`.
use tracing::debug;

use crate::{Capability, Result, ScheduleDb, ScheduleError, SessionContext};

#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub level: i64,
    /// Sections of the version being refined, passed through untouched.
    pub current_sections: serde_json::Value,
    pub constraints: Vec<String>,
    pub command: String,
}

pub trait ScheduleProposer {
    fn propose(&self, request: &ProposalRequest) -> std::result::Result<serde_json::Value, String>;
}

/// Build a proposal request from a stored version plus the rules table, run
/// the proposer, and hand back the candidate sections.
pub fn propose_candidate(
    db: &ScheduleDb,
    proposer: &dyn ScheduleProposer,
    ctx: &SessionContext,
    base_version_id: &str,
    command: &str,
) -> Result<serde_json::Value> {
    ctx.require(Capability::Scheduler)?;
    let base = db.get_version(base_version_id)?;
    let constraints = db.list_rules()?.into_iter().map(|r| r.text).collect();
    let request = ProposalRequest {
        level: base.level,
        current_sections: base.sections,
        constraints,
        command: command.to_string(),
    };
    debug!(version = base_version_id, level = request.level, "requesting schedule proposal");
    proposer
        .propose(&request)
        .map_err(ScheduleError::UpstreamGenerationFailed)
}
