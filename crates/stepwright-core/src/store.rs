//! Record-store collaborator.
//!
//! The persistence engine is external; this module only names the calls the
//! authoring core makes against it. Each call is treated as atomic on its
//! own, nothing here assumes multi-call transactions.

use crate::proposal::{ProposalStatus, WorkflowProposalRecord};
use crate::{WorkflowDag, WorkflowRecord};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn fetch_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>>;

    /// Replace the workflow's DAG and move it to a fresh version id.
    async fn update_workflow_dag(
        &self,
        workflow_id: &str,
        dag: WorkflowDag,
    ) -> Result<WorkflowRecord>;
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn insert_proposal(&self, record: &WorkflowProposalRecord) -> Result<()>;

    async fn fetch_proposal(&self, id: Uuid) -> Result<Option<WorkflowProposalRecord>>;

    async fn list_proposals(&self, workflow_id: &str) -> Result<Vec<WorkflowProposalRecord>>;

    /// Returns whether a record was updated. A missing id is not an error:
    /// a concurrent reader may already have expired and deleted it.
    async fn update_proposal_status(
        &self,
        id: Uuid,
        status: ProposalStatus,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Returns whether a record was removed.
    async fn delete_proposal(&self, id: Uuid) -> Result<bool>;
}

/// Process-local store for tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    workflows: Mutex<HashMap<String, WorkflowRecord>>,
    proposals: Mutex<HashMap<Uuid, WorkflowProposalRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow(workflow: WorkflowRecord) -> Self {
        let store = Self::new();
        store.put_workflow(workflow);
        store
    }

    pub fn put_workflow(&self, workflow: WorkflowRecord) {
        self.workflows.lock().insert(workflow.id.clone(), workflow);
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<WorkflowRecord> {
        self.workflows.lock().get(workflow_id).cloned()
    }

    pub fn proposal(&self, id: Uuid) -> Option<WorkflowProposalRecord> {
        self.proposals.lock().get(&id).cloned()
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.lock().len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn fetch_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        Ok(self.workflow(workflow_id))
    }

    async fn update_workflow_dag(
        &self,
        workflow_id: &str,
        dag: WorkflowDag,
    ) -> Result<WorkflowRecord> {
        let mut workflows = self.workflows.lock();
        let record = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| anyhow!("Workflow {} not found", workflow_id))?;
        record.dag = dag;
        record.version_id = Some(Uuid::new_v4().to_string());
        Ok(record.clone())
    }
}

#[async_trait]
impl ProposalStore for InMemoryStore {
    async fn insert_proposal(&self, record: &WorkflowProposalRecord) -> Result<()> {
        self.proposals.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn fetch_proposal(&self, id: Uuid) -> Result<Option<WorkflowProposalRecord>> {
        Ok(self.proposal(id))
    }

    async fn list_proposals(&self, workflow_id: &str) -> Result<Vec<WorkflowProposalRecord>> {
        let mut records: Vec<_> = self
            .proposals
            .lock()
            .values()
            .filter(|p| p.workflow_id == workflow_id)
            .cloned()
            .collect();
        records.sort_by_key(|p| p.created_at);
        Ok(records)
    }

    async fn update_proposal_status(
        &self,
        id: Uuid,
        status: ProposalStatus,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut proposals = self.proposals.lock();
        let Some(record) = proposals.get_mut(&id) else {
            return Ok(false);
        };
        record.status = status;
        record.resolved_at = resolved_at;
        Ok(true)
    }

    async fn delete_proposal(&self, id: Uuid) -> Result<bool> {
        Ok(self.proposals.lock().remove(&id).is_some())
    }
}
