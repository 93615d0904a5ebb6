//! Proposal lifecycle: `pending → applied | rejected | expired`.
//!
//! Expiration is lazy. Every read path checks `expires_at` against the
//! clock and, for a stale pending proposal, marks it expired and deletes it
//! before reporting [`ProposalError::Expired`]. There is no background sweep.

use crate::store::{ProposalStore, WorkflowStore};
use crate::{NormalizedToolCall, WorkflowDag};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_PROPOSAL_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Applied,
    Expired,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Applied => "applied",
            ProposalStatus::Expired => "expired",
            ProposalStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowProposalRecord {
    pub id: Uuid,
    pub workflow_id: String,
    /// Workflow version the proposal was computed against.
    pub base_version_id: Option<String>,
    pub user_message: String,
    pub model_id: String,
    pub tool_calls: Vec<NormalizedToolCall>,
    pub proposed_dag: WorkflowDag,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ProposalStatus,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl WorkflowProposalRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Parameters for [`ProposalManager::create`].
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub workflow_id: String,
    pub base_version_id: Option<String>,
    pub user_message: String,
    pub model_id: String,
    pub tool_calls: Vec<NormalizedToolCall>,
    pub proposed_dag: WorkflowDag,
}

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("Proposal {0} not found")]
    NotFound(Uuid),

    #[error("Proposal {0} has expired, please retry")]
    Expired(Uuid),

    #[error(
        "Workflow changed since proposal {id} was created (base version {expected:?}, current {found:?})"
    )]
    VersionMismatch {
        id: Uuid,
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("Proposal {id} is already {status}")]
    NotPending { id: Uuid, status: ProposalStatus },

    #[error("Proposal store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ProposalError {
    /// HTTP-equivalent status for callers that surface these to clients.
    pub fn status_code(&self) -> u16 {
        match self {
            ProposalError::NotFound(_) => 404,
            ProposalError::Expired(_) => 410,
            ProposalError::VersionMismatch { .. } | ProposalError::NotPending { .. } => 409,
            ProposalError::Store(_) => 500,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct ProposalManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<S> ProposalManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl: Duration::seconds(DEFAULT_PROPOSAL_TTL_SECS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl<S: ProposalStore> ProposalManager<S> {
    pub async fn create(
        &self,
        params: NewProposal,
    ) -> Result<WorkflowProposalRecord, ProposalError> {
        let created_at = self.clock.now();
        let record = WorkflowProposalRecord {
            id: Uuid::new_v4(),
            workflow_id: params.workflow_id,
            base_version_id: params.base_version_id,
            user_message: params.user_message,
            model_id: params.model_id,
            tool_calls: params.tool_calls,
            proposed_dag: params.proposed_dag,
            created_at,
            expires_at: created_at
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            status: ProposalStatus::Pending,
            resolved_at: None,
        };
        self.store.insert_proposal(&record).await?;

        info!(
            proposal_id = %record.id,
            workflow_id = %record.workflow_id,
            tool_calls = record.tool_calls.len(),
            expires_at = %record.expires_at,
            "Created workflow proposal"
        );
        Ok(record)
    }

    /// Fetch a proposal, enforcing expiry.
    pub async fn resolve(&self, id: Uuid) -> Result<WorkflowProposalRecord, ProposalError> {
        let record = self
            .store
            .fetch_proposal(id)
            .await?
            .ok_or(ProposalError::NotFound(id))?;

        if self.is_stale(&record) {
            self.expire(&record).await?;
            return Err(ProposalError::Expired(id));
        }
        Ok(record)
    }

    /// Explicitly abandon a pending proposal. The record is deleted.
    pub async fn reject(&self, id: Uuid) -> Result<WorkflowProposalRecord, ProposalError> {
        let mut record = self.resolve(id).await?;
        ensure_pending(&record)?;

        let now = self.clock.now();
        if !self
            .store
            .update_proposal_status(id, ProposalStatus::Rejected, Some(now))
            .await?
        {
            return Err(ProposalError::NotFound(id));
        }
        self.store.delete_proposal(id).await?;

        record.status = ProposalStatus::Rejected;
        record.resolved_at = Some(now);
        info!(proposal_id = %id, workflow_id = %record.workflow_id, "Rejected workflow proposal");
        Ok(record)
    }

    /// Most recent live pending proposal for a workflow. Expired proposals
    /// met during the scan are cleaned up.
    pub async fn latest_for_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowProposalRecord>, ProposalError> {
        let mut latest: Option<WorkflowProposalRecord> = None;
        for record in self.store.list_proposals(workflow_id).await? {
            if self.is_stale(&record) {
                self.expire(&record).await?;
                continue;
            }
            if record.status != ProposalStatus::Pending {
                continue;
            }
            if latest
                .as_ref()
                .is_none_or(|best| record.created_at > best.created_at)
            {
                latest = Some(record);
            }
        }
        Ok(latest)
    }

    fn is_stale(&self, record: &WorkflowProposalRecord) -> bool {
        record.status == ProposalStatus::Pending && record.is_expired_at(self.clock.now())
    }

    async fn expire(&self, record: &WorkflowProposalRecord) -> Result<(), ProposalError> {
        warn!(
            proposal_id = %record.id,
            workflow_id = %record.workflow_id,
            expires_at = %record.expires_at,
            "Workflow proposal expired"
        );
        // Another reader may have expired it first; either way it is gone.
        let marked = self
            .store
            .update_proposal_status(record.id, ProposalStatus::Expired, Some(self.clock.now()))
            .await?;
        let deleted = self.store.delete_proposal(record.id).await?;
        if !marked || !deleted {
            debug!(proposal_id = %record.id, "Expired proposal already removed");
        }
        Ok(())
    }
}

impl<S: ProposalStore + WorkflowStore> ProposalManager<S> {
    /// Commit a pending proposal's DAG to its workflow.
    ///
    /// `current_version_id` is the workflow's live version as the caller
    /// last read it. If it differs from the proposal's base version the
    /// workflow is left untouched and the caller has to regenerate.
    ///
    /// The version check and the DAG write are two separate store calls; a
    /// concurrent write landing between them is not detected.
    pub async fn apply(
        &self,
        id: Uuid,
        current_version_id: Option<&str>,
    ) -> Result<WorkflowDag, ProposalError> {
        let record = self.resolve(id).await?;
        ensure_pending(&record)?;

        if record.base_version_id.as_deref() != current_version_id {
            warn!(
                proposal_id = %id,
                base_version = ?record.base_version_id,
                current_version = ?current_version_id,
                "Proposal version mismatch"
            );
            return Err(ProposalError::VersionMismatch {
                id,
                expected: record.base_version_id.clone(),
                found: current_version_id.map(String::from),
            });
        }

        let updated = self
            .store
            .update_workflow_dag(&record.workflow_id, record.proposed_dag.clone())
            .await?;
        if !self
            .store
            .update_proposal_status(id, ProposalStatus::Applied, Some(self.clock.now()))
            .await?
        {
            warn!(proposal_id = %id, "Proposal record vanished after its DAG was applied");
        }

        info!(
            proposal_id = %id,
            workflow_id = %record.workflow_id,
            new_version = ?updated.version_id,
            steps = updated.dag.len(),
            "Applied workflow proposal"
        );
        Ok(updated.dag)
    }
}

fn ensure_pending(record: &WorkflowProposalRecord) -> Result<(), ProposalError> {
    if record.status == ProposalStatus::Pending {
        Ok(())
    } else {
        Err(ProposalError::NotPending {
            id: record.id,
            status: record.status,
        })
    }
}
