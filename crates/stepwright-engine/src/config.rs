use chrono::Duration;
use serde::{Deserialize, Serialize};
use stepwright_core::proposal::DEFAULT_PROPOSAL_TTL_SECS;
use stepwright_llm::authoring::StageOptions;
use stepwright_llm::authoring::conversation::DEFAULT_WINDOW_SIZE;

/// Tunables for the authoring pipeline. Every field has a default, so a
/// partial `[authoring]` table is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthoringConfig {
    pub proposal_ttl_secs: i64,
    /// Conversation exchanges fed back into prompts.
    pub window_size: usize,
    pub intent: StageOptions,
    pub tool_calls: StageOptions,
    pub tool_usage: StageOptions,
    pub step_plan: StageOptions,
}

impl Default for AuthoringConfig {
    fn default() -> Self {
        Self {
            proposal_ttl_secs: DEFAULT_PROPOSAL_TTL_SECS,
            window_size: DEFAULT_WINDOW_SIZE,
            intent: StageOptions::INTENT,
            tool_calls: StageOptions::TOOL_CALLS,
            tool_usage: StageOptions::TOOL_USAGE,
            step_plan: StageOptions::STEP_PLAN,
        }
    }
}

impl AuthoringConfig {
    /// Negative values mean immediate expiry. Values beyond what a
    /// `Duration` can hold saturate.
    pub fn proposal_ttl(&self) -> Duration {
        Duration::try_seconds(self.proposal_ttl_secs.max(0)).unwrap_or(Duration::MAX)
    }
}
