mod config;

#[cfg(test)]
mod tests;

pub use config::AuthoringConfig;

use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use stepwright_core::proposal::{
    Clock, NewProposal, ProposalError, ProposalManager, WorkflowProposalRecord,
};
use stepwright_core::store::{InMemoryStore, ProposalStore, WorkflowStore};
use stepwright_core::{
    ADD_STEP, ApplyError, NormalizedToolCall, ToolCatalog, WorkflowRecord, WorkflowStep,
    WorkflowToolCall, apply_tool_calls, describe_tool_calls,
};
use stepwright_llm::authoring::conversation::ConversationSession;
use stepwright_llm::authoring::{
    AuthoringError, AuthoringInput, WorkflowIntent, generate_workflow_intent,
    generate_workflow_step_plan, generate_workflow_step_tool_usage, generate_workflow_tool_calls,
    plan_to_tool_calls,
};
use stepwright_llm::{ChatBackend, LlmClient, LlmConfig};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthorError {
    #[error("Workflow {0} not found")]
    WorkflowNotFound(String),

    #[error(transparent)]
    Authoring(#[from] AuthoringError),

    #[error("Proposed edit rejected: {0}")]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),

    #[error("Workflow store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl AuthorError {
    /// HTTP-equivalent status for callers that surface these to clients.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthorError::WorkflowNotFound(_) => 404,
            AuthorError::Authoring(_) => 502,
            AuthorError::Apply(_) => 422,
            AuthorError::Proposal(e) => e.status_code(),
            AuthorError::Store(_) => 500,
        }
    }
}

/// One workflow chat turn.
#[derive(Debug, Clone)]
pub struct AuthoringRequest {
    pub workflow_id: String,
    pub user_message: String,
    pub conversation_context: Option<String>,
}

impl AuthoringRequest {
    pub fn new(workflow_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            user_message: user_message.into(),
            conversation_context: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.conversation_context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthoringOutcome {
    Answer {
        message: String,
    },
    Clarify {
        message: String,
        question: Option<String>,
    },
    Proposal {
        message: String,
        proposal: WorkflowProposalRecord,
    },
}

impl AuthoringOutcome {
    pub fn message(&self) -> &str {
        match self {
            AuthoringOutcome::Answer { message }
            | AuthoringOutcome::Clarify { message, .. }
            | AuthoringOutcome::Proposal { message, .. } => message,
        }
    }

    pub fn proposal(&self) -> Option<&WorkflowProposalRecord> {
        match self {
            AuthoringOutcome::Proposal { proposal, .. } => Some(proposal),
            _ => None,
        }
    }
}

/// Mediates between the model and the workflow store: classifies a chat
/// message, turns edit requests into a pending proposal, and commits or
/// drops proposals on request.
pub struct WorkflowAuthor<C: ChatBackend = LlmClient, S = InMemoryStore> {
    backend: C,
    store: Arc<S>,
    catalog: ToolCatalog,
    config: AuthoringConfig,
    proposals: ProposalManager<S>,
}

impl<S> WorkflowAuthor<LlmClient, S> {
    pub fn from_llm_config(
        llm: LlmConfig,
        store: Arc<S>,
        catalog: ToolCatalog,
        config: AuthoringConfig,
    ) -> Self {
        Self::new(LlmClient::new(llm), store, catalog, config)
    }
}

impl<C: ChatBackend, S> WorkflowAuthor<C, S> {
    pub fn new(backend: C, store: Arc<S>, catalog: ToolCatalog, config: AuthoringConfig) -> Self {
        let proposals = ProposalManager::new(store.clone()).with_ttl(config.proposal_ttl());
        Self {
            backend,
            store,
            catalog,
            config,
            proposals,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.proposals = self.proposals.with_clock(clock);
        self
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &AuthoringConfig {
        &self.config
    }

    /// Conversation context for prompts, limited to the configured window.
    pub fn context_from(&self, session: &ConversationSession) -> Option<String> {
        session.format_context(Some(self.config.window_size))
    }
}

impl<C: ChatBackend, S: WorkflowStore + ProposalStore> WorkflowAuthor<C, S> {
    async fn fetch_workflow(&self, workflow_id: &str) -> Result<WorkflowRecord, AuthorError> {
        self.store
            .fetch_workflow(workflow_id)
            .await?
            .ok_or_else(|| AuthorError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Run one chat turn. Edits are never applied here; they come back as a
    /// pending proposal for [`confirm_proposal`](Self::confirm_proposal).
    pub async fn handle_message(
        &self,
        request: AuthoringRequest,
    ) -> Result<AuthoringOutcome, AuthorError> {
        let workflow = self.fetch_workflow(&request.workflow_id).await?;
        let input = AuthoringInput {
            user_message: &request.user_message,
            workflow_name: &workflow.name,
            workflow_description: workflow.description.as_deref(),
            dag: &workflow.dag,
            available_tools: &self.catalog,
            conversation_context: request.conversation_context.as_deref(),
        };

        let intent = generate_workflow_intent(&self.backend, &input, self.config.intent).await?;
        match intent.intent {
            WorkflowIntent::AnswerOnly => {
                return Ok(AuthoringOutcome::Answer {
                    message: intent.assistant_message,
                });
            }
            WorkflowIntent::AskClarifying => {
                return Ok(AuthoringOutcome::Clarify {
                    message: intent.assistant_message,
                    question: intent.clarification_question,
                });
            }
            WorkflowIntent::ModifyWorkflow => {}
        }

        let generated =
            generate_workflow_tool_calls(&self.backend, &input, self.config.tool_calls).await?;
        if generated.tool_calls.is_empty() {
            info!(workflow_id = %workflow.id, "Edit intent produced no tool calls");
            return Ok(AuthoringOutcome::Answer {
                message: generated.assistant_message,
            });
        }

        let mut tool_calls = generated.tool_calls;
        self.attach_tool_usage(&input, &mut tool_calls).await?;

        let proposal = self
            .propose(&workflow, &request.user_message, tool_calls)
            .await?;
        Ok(AuthoringOutcome::Proposal {
            message: generated.assistant_message,
            proposal,
        })
    }

    /// Plan a workflow from a description and propose the planned steps,
    /// appended to whatever the workflow already has.
    pub async fn draft_workflow(
        &self,
        workflow_id: &str,
        description: &str,
        conversation_context: Option<&str>,
    ) -> Result<AuthoringOutcome, AuthorError> {
        let workflow = self.fetch_workflow(workflow_id).await?;
        let plan = generate_workflow_step_plan(
            &self.backend,
            description,
            &workflow.name,
            workflow.description.as_deref(),
            &self.catalog,
            conversation_context,
            self.config.step_plan,
        )
        .await?;

        let mut tool_calls = plan_to_tool_calls(&plan.steps);
        let input = AuthoringInput {
            user_message: description,
            workflow_name: &workflow.name,
            workflow_description: workflow.description.as_deref(),
            dag: &workflow.dag,
            available_tools: &self.catalog,
            conversation_context,
        };
        self.attach_tool_usage(&input, &mut tool_calls).await?;

        let message = format!("{} Confirm to apply.", describe_tool_calls(&tool_calls));
        let proposal = self.propose(&workflow, description, tool_calls).await?;
        Ok(AuthoringOutcome::Proposal { message, proposal })
    }

    /// Run the tool-usage classifier over `add_step` calls that did not pick
    /// tools themselves and write the decided tools into their arguments.
    async fn attach_tool_usage(
        &self,
        input: &AuthoringInput<'_>,
        tool_calls: &mut [NormalizedToolCall],
    ) -> Result<(), AuthorError> {
        if self.catalog.is_empty() {
            return Ok(());
        }

        let mut candidates: Vec<(usize, WorkflowStep)> = Vec::new();
        for (i, call) in tool_calls.iter().enumerate() {
            if call.name != ADD_STEP {
                continue;
            }
            // Malformed calls are reported by the applier.
            let Ok(WorkflowToolCall::AddStep(args)) = WorkflowToolCall::from_normalized(call)
            else {
                continue;
            };
            if args.tools.is_some() {
                continue;
            }
            let id = args.temp_id.unwrap_or_else(|| format!("new_{}", i + 1));
            let step = WorkflowStep::new(args.name, args.instruction)
                .with_id(id)
                .depending_on(args.depends_on.unwrap_or_default());
            candidates.push((i, step));
        }
        if candidates.is_empty() {
            return Ok(());
        }

        let steps: Vec<WorkflowStep> = candidates.iter().map(|(_, s)| s.clone()).collect();
        let usage = generate_workflow_step_tool_usage(
            &self.backend,
            input,
            &steps,
            self.config.tool_usage,
        )
        .await?;

        for decision in usage.steps.into_iter().filter(|d| d.use_tools) {
            let Some((index, _)) = candidates.iter().find(|(_, s)| s.id == decision.step_id) else {
                continue;
            };
            let tools: Vec<Value> = decision
                .tools
                .iter()
                .map(|t| json!({"id": t.id, "version": t.version}))
                .collect();
            if let Some(args) = tool_calls[*index].args.as_object_mut() {
                debug!(step = %decision.step_id, tools = tools.len(), "Attaching tools to new step");
                args.insert("tools".to_string(), Value::Array(tools));
            }
        }
        Ok(())
    }

    async fn propose(
        &self,
        workflow: &WorkflowRecord,
        user_message: &str,
        tool_calls: Vec<NormalizedToolCall>,
    ) -> Result<WorkflowProposalRecord, AuthorError> {
        let proposed_dag = apply_tool_calls(&workflow.dag, &tool_calls)?;
        self.catalog.check_new_refs(&workflow.dag, &proposed_dag)?;

        let proposal = self
            .proposals
            .create(NewProposal {
                workflow_id: workflow.id.clone(),
                base_version_id: workflow.version_id.clone(),
                user_message: user_message.to_string(),
                model_id: self.backend.model_name().to_string(),
                tool_calls,
                proposed_dag,
            })
            .await?;
        Ok(proposal)
    }

    /// Apply a pending proposal against the workflow's live version.
    pub async fn confirm_proposal(&self, proposal_id: Uuid) -> Result<WorkflowRecord, AuthorError> {
        let proposal = self.proposals.resolve(proposal_id).await?;
        let workflow = self.fetch_workflow(&proposal.workflow_id).await?;
        self.proposals
            .apply(proposal_id, workflow.version_id.as_deref())
            .await?;
        self.fetch_workflow(&proposal.workflow_id).await
    }

    pub async fn reject_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<WorkflowProposalRecord, AuthorError> {
        Ok(self.proposals.reject(proposal_id).await?)
    }

    pub async fn pending_proposal(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowProposalRecord>, AuthorError> {
        Ok(self.proposals.latest_for_workflow(workflow_id).await?)
    }
}
