use super::*;
use chrono::{Duration, TimeZone, Utc};
use std::sync::Mutex;
use stepwright_core::proposal::{ManualClock, ProposalStatus};
use stepwright_core::{ToolDefinition, ToolRef, ValidationError, WorkflowDag};
use stepwright_llm::{ChatOptions, ChatResponse, Choice, Message, ToolCall};

// ── Test helpers ────────────────────────────────────────────────

enum Reply {
    Text(&'static str),
    Calls(Option<&'static str>, Vec<ToolCall>),
}

/// Replays scripted replies in order and records every prompt it was sent.
struct MockBackend {
    replies: Mutex<Vec<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl ChatBackend for MockBackend {
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        _tools: Option<Vec<Value>>,
    ) -> anyhow::Result<ChatResponse> {
        let prompt = messages
            .last()
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            anyhow::ensure!(!replies.is_empty(), "no scripted reply left");
            replies.remove(0)
        };
        let message = match reply {
            Reply::Text(text) => Message::assistant(text),
            Reply::Calls(content, calls) => {
                Message::assistant_tool_calls(content.map(String::from), calls)
            }
        };
        Ok(ChatResponse {
            id: "mock".to_string(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        })
    }

    async fn chat_with_options(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Value>>,
        _options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.chat(messages, tools).await
    }
}

const MODIFY: &str = r#"{"intent": "modify_workflow", "assistantMessage": "On it.", "clarificationQuestion": null}"#;

fn catalog() -> ToolCatalog {
    ToolCatalog::new(vec![ToolDefinition {
        id: "web_search".into(),
        version: "1".into(),
        name: "Web search".into(),
        description: Some("Search the web".into()),
    }])
}

fn workflow() -> WorkflowRecord {
    let mut record = WorkflowRecord::new("wf-1", "Digest");
    record.description = Some("Weekly news digest".into());
    record.version_id = Some("v1".into());
    record.dag = WorkflowDag::new(vec![
        WorkflowStep::new("Research", "Find recent articles")
            .with_id("s1")
            .with_tools(vec![ToolRef::new("web_search", "1")]),
        WorkflowStep::new("Summarize", "Summarize findings")
            .with_id("s2")
            .depending_on(["s1"]),
    ]);
    record
}

fn author(replies: Vec<Reply>) -> (WorkflowAuthor<MockBackend>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::with_workflow(workflow()));
    let author = WorkflowAuthor::new(
        MockBackend::new(replies),
        store.clone(),
        catalog(),
        AuthoringConfig::default(),
    );
    (author, store)
}

fn add_email_step() -> Reply {
    Reply::Calls(
        Some("Added a step that emails the summary."),
        vec![ToolCall::function(
            "call_1",
            "add_step",
            r#"{"name": "Email summary", "instruction": "Email the summary to the team"}"#,
        )],
    )
}

const NO_TOOLS_FOR_NEW_STEP: &str =
    r#"{"steps": [{"stepId": "new_1", "useTools": false, "tools": []}]}"#;

async fn propose_email_step(author: &WorkflowAuthor<MockBackend>) -> WorkflowProposalRecord {
    let outcome = author
        .handle_message(AuthoringRequest::new(
            "wf-1",
            "Add a step that emails the summary",
        ))
        .await
        .unwrap();
    outcome.proposal().cloned().unwrap()
}

// ── handle_message ──────────────────────────────────────────────

#[tokio::test]
async fn clean_edit_creates_pending_proposal() {
    let (author, store) = author(vec![
        Reply::Text(MODIFY),
        add_email_step(),
        Reply::Text(NO_TOOLS_FOR_NEW_STEP),
    ]);

    let outcome = author
        .handle_message(AuthoringRequest::new(
            "wf-1",
            "Add a step that emails the summary",
        ))
        .await
        .unwrap();

    assert_eq!(outcome.message(), "Added a step that emails the summary.");
    let proposal = outcome.proposal().unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert_eq!(proposal.base_version_id.as_deref(), Some("v1"));
    assert_eq!(proposal.model_id, "mock-model");
    assert_eq!(proposal.tool_calls.len(), 1);
    assert_eq!(proposal.expires_at - proposal.created_at, Duration::seconds(300));

    let dag = &proposal.proposed_dag;
    assert_eq!(dag.len(), 3);
    let added = dag.steps.iter().find(|s| s.name == "Email summary").unwrap();
    assert!(added.depends_on.is_empty());
    assert!(added.tools.is_empty());

    // Nothing is written until confirmation.
    assert_eq!(store.workflow("wf-1").unwrap().dag.len(), 2);
    assert_eq!(store.proposal_count(), 1);
    assert_eq!(author.backend().call_count(), 3);
}

#[tokio::test]
async fn confirm_applies_proposal_and_bumps_version() {
    let (author, store) = author(vec![
        Reply::Text(MODIFY),
        add_email_step(),
        Reply::Text(NO_TOOLS_FOR_NEW_STEP),
    ]);
    let proposal = propose_email_step(&author).await;

    let updated = author.confirm_proposal(proposal.id).await.unwrap();
    assert_eq!(updated.dag, proposal.proposed_dag);
    assert_ne!(updated.version_id.as_deref(), Some("v1"));
    assert_eq!(
        store.proposal(proposal.id).unwrap().status,
        ProposalStatus::Applied
    );

    // A second confirmation is a conflict, not a re-apply.
    let err = author.confirm_proposal(proposal.id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn answer_intent_returns_message() {
    let (author, store) = author(vec![Reply::Text(
        r#"{"intent": "answer_only", "assistantMessage": "It has two steps.", "clarificationQuestion": null}"#,
    )]);
    let outcome = author
        .handle_message(AuthoringRequest::new("wf-1", "How many steps are there?"))
        .await
        .unwrap();

    assert!(matches!(outcome, AuthoringOutcome::Answer { ref message } if message == "It has two steps."));
    assert_eq!(store.proposal_count(), 0);
}

#[tokio::test]
async fn ambiguous_request_asks_for_clarification() {
    let (author, _store) = author(vec![Reply::Text(r#"{"intent": "modify_work"#)]);
    let outcome = author
        .handle_message(AuthoringRequest::new("wf-1", "Make this workflow better"))
        .await
        .unwrap();

    match outcome {
        AuthoringOutcome::Clarify { question, .. } => {
            assert_eq!(
                question.as_deref(),
                Some("What should I change in this workflow?")
            );
        }
        other => panic!("expected clarification, got {:?}", other),
    }
    assert_eq!(author.backend().call_count(), 1);
}

#[tokio::test]
async fn edit_intent_without_calls_is_an_answer() {
    let (author, store) = author(vec![
        Reply::Text(MODIFY),
        Reply::Text("The workflow already does that."),
    ]);
    let outcome = author
        .handle_message(AuthoringRequest::new("wf-1", "Make sure it summarizes"))
        .await
        .unwrap();

    assert!(matches!(outcome, AuthoringOutcome::Answer { .. }));
    assert_eq!(outcome.message(), "The workflow already does that.");
    assert_eq!(store.proposal_count(), 0);
}

#[tokio::test]
async fn conversation_context_reaches_prompts() {
    let (author, _store) = author(vec![Reply::Text(
        r#"{"intent": "answer_only", "assistantMessage": "Sure.", "clarificationQuestion": null}"#,
    )]);
    let session = ConversationSession::from_stored([("USER", "hello"), ("ASSISTANT", "hi there")]);
    let request = AuthoringRequest::new("wf-1", "thanks").with_context(author.context_from(&session));

    author.handle_message(request).await.unwrap();
    let prompts = author.backend().prompts.lock().unwrap();
    assert!(prompts[0].contains("User: hello\nAssistant: hi there"));
}

#[tokio::test]
async fn unknown_workflow_is_not_found() {
    let (author, _store) = author(vec![]);
    let err = author
        .handle_message(AuthoringRequest::new("missing", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthorError::WorkflowNotFound(ref id) if id == "missing"));
    assert_eq!(err.status_code(), 404);
    assert_eq!(author.backend().call_count(), 0);
}

#[tokio::test]
async fn cycle_rejects_whole_batch() {
    let (author, store) = author(vec![
        Reply::Text(MODIFY),
        Reply::Calls(
            None,
            vec![
                ToolCall::function("1", "update_step", r#"{"stepId": "s1", "name": "Research more"}"#),
                ToolCall::function("2", "reorder_steps", r#"{"stepId": "s1", "newDependsOn": ["s2"]}"#),
            ],
        ),
    ]);
    let err = author
        .handle_message(AuthoringRequest::new("wf-1", "Run research after summarizing"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthorError::Apply(ApplyError::Validation(ValidationError::CycleDetected(_)))
    ));
    assert_eq!(err.status_code(), 422);
    assert_eq!(store.proposal_count(), 0);
    assert_eq!(store.workflow("wf-1").unwrap(), workflow());
}

#[tokio::test]
async fn unknown_tool_reference_is_rejected() {
    let (author, store) = author(vec![
        Reply::Text(MODIFY),
        Reply::Calls(
            None,
            vec![ToolCall::function(
                "1",
                "update_step",
                r#"{"stepId": "s2", "addTools": [{"id": "fax", "version": "1"}]}"#,
            )],
        ),
    ]);
    let err = author
        .handle_message(AuthoringRequest::new("wf-1", "Fax the summary"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthorError::Apply(ApplyError::UnknownToolRef { .. })));
    assert_eq!(store.proposal_count(), 0);
}

#[tokio::test]
async fn stale_tool_on_untouched_step_does_not_block_edits() {
    let mut stale = workflow();
    stale.dag.steps[0].tools = vec![ToolRef::new("web_search", "0")];
    let store = Arc::new(InMemoryStore::with_workflow(stale));
    let author = WorkflowAuthor::new(
        MockBackend::new(vec![
            Reply::Text(MODIFY),
            Reply::Calls(
                None,
                vec![ToolCall::function(
                    "1",
                    "update_step",
                    r#"{"stepId": "s2", "name": "Summarize briefly"}"#,
                )],
            ),
        ]),
        store.clone(),
        catalog(),
        AuthoringConfig::default(),
    );

    let outcome = author
        .handle_message(AuthoringRequest::new("wf-1", "Rename the summary step"))
        .await
        .unwrap();

    let proposal = outcome.proposal().unwrap();
    let dag = &proposal.proposed_dag;
    assert_eq!(dag.find_step("s2").unwrap().name, "Summarize briefly");
    assert_eq!(
        dag.find_step("s1").unwrap().tools,
        vec![ToolRef::new("web_search", "0")]
    );
    assert_eq!(store.proposal_count(), 1);
}

#[tokio::test]
async fn model_chosen_tools_skip_classifier() {
    let (author, _store) = author(vec![
        Reply::Text(MODIFY),
        Reply::Calls(
            None,
            vec![ToolCall::function(
                "1",
                "add_step",
                r#"{"name": "Search", "instruction": "Search for follow-ups", "tools": [{"id": "web_search", "version": "1"}], "dependsOn": ["s2"]}"#,
            )],
        ),
    ]);
    let proposal = propose_email_step(&author).await;

    assert_eq!(author.backend().call_count(), 2);
    let added = proposal.proposed_dag.steps.last().unwrap();
    assert_eq!(added.tools, vec![ToolRef::new("web_search", "1")]);
    assert_eq!(added.depends_on, vec!["s2".to_string()]);
}

// ── Proposal lifecycle ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_edit_causes_version_conflict() {
    let (author, store) = author(vec![
        Reply::Text(MODIFY),
        add_email_step(),
        Reply::Text(NO_TOOLS_FOR_NEW_STEP),
    ]);
    let proposal = propose_email_step(&author).await;

    // Someone else edits the workflow in the meantime.
    let concurrent = WorkflowDag::new(vec![WorkflowStep::new("Only", "Only step").with_id("x")]);
    store.update_workflow_dag("wf-1", concurrent.clone()).await.unwrap();

    let err = author.confirm_proposal(proposal.id).await.unwrap_err();
    assert!(matches!(
        err,
        AuthorError::Proposal(ProposalError::VersionMismatch { .. })
    ));
    assert_eq!(err.status_code(), 409);
    assert_eq!(store.workflow("wf-1").unwrap().dag, concurrent);
    assert_eq!(
        store.proposal(proposal.id).unwrap().status,
        ProposalStatus::Pending
    );
}

#[tokio::test]
async fn expired_proposal_is_gone_after_first_read() {
    let store = Arc::new(InMemoryStore::with_workflow(workflow()));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap(),
    ));
    let author = WorkflowAuthor::new(
        MockBackend::new(vec![
            Reply::Text(MODIFY),
            add_email_step(),
            Reply::Text(NO_TOOLS_FOR_NEW_STEP),
        ]),
        store.clone(),
        catalog(),
        AuthoringConfig::default(),
    )
    .with_clock(clock.clone());

    let proposal = propose_email_step(&author).await;
    clock.advance(Duration::seconds(301));

    let err = author.confirm_proposal(proposal.id).await.unwrap_err();
    assert!(matches!(err, AuthorError::Proposal(ProposalError::Expired(_))));
    assert_eq!(err.status_code(), 410);
    assert_eq!(store.proposal_count(), 0);
    assert_eq!(store.workflow("wf-1").unwrap().dag.len(), 2);

    let err = author.confirm_proposal(proposal.id).await.unwrap_err();
    assert!(matches!(err, AuthorError::Proposal(ProposalError::NotFound(_))));
}

#[tokio::test]
async fn reject_removes_pending_proposal() {
    let (author, store) = author(vec![
        Reply::Text(MODIFY),
        add_email_step(),
        Reply::Text(NO_TOOLS_FOR_NEW_STEP),
    ]);
    let proposal = propose_email_step(&author).await;
    assert_eq!(
        author.pending_proposal("wf-1").await.unwrap().map(|p| p.id),
        Some(proposal.id)
    );

    let rejected = author.reject_proposal(proposal.id).await.unwrap();
    assert_eq!(rejected.status, ProposalStatus::Rejected);
    assert_eq!(store.proposal_count(), 0);
    assert!(author.pending_proposal("wf-1").await.unwrap().is_none());
    assert_eq!(store.workflow("wf-1").unwrap().dag.len(), 2);
}

// ── Draft path ──────────────────────────────────────────────────

#[tokio::test]
async fn draft_plans_steps_and_attaches_tools() {
    let store = Arc::new(InMemoryStore::with_workflow(WorkflowRecord::new("wf-2", "Digest")));
    let author = WorkflowAuthor::new(
        MockBackend::new(vec![
            Reply::Text(
                r#"{"steps": [
                    {"tempId": "fetch", "name": "Fetch news", "instruction": "Search for this week's AI news"},
                    {"tempId": "write", "name": "Write digest", "instruction": "Summarize findings", "dependsOn": ["fetch"]}
                ]}"#,
            ),
            Reply::Text(
                r#"{"steps": [
                    {"stepId": "fetch", "useTools": true, "tools": [{"id": "web_search", "version": "1"}]},
                    {"stepId": "write", "useTools": false, "tools": []}
                ]}"#,
            ),
        ]),
        store.clone(),
        catalog(),
        AuthoringConfig::default(),
    );

    let outcome = author
        .draft_workflow("wf-2", "A weekly AI news digest", None)
        .await
        .unwrap();
    assert_eq!(outcome.message(), "Added 2 steps. Confirm to apply.");

    let proposal = outcome.proposal().unwrap();
    assert_eq!(proposal.base_version_id, None);
    let steps = &proposal.proposed_dag.steps;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].name, "Fetch news");
    assert_eq!(steps[0].tools, vec![ToolRef::new("web_search", "1")]);
    assert!(steps[1].tools.is_empty());
    assert_eq!(steps[1].depends_on, vec![steps[0].id.clone()]);

    let updated = author.confirm_proposal(proposal.id).await.unwrap();
    assert_eq!(updated.dag.len(), 2);
    assert!(updated.version_id.is_some());
}

#[tokio::test]
async fn draft_with_unparseable_plan_fails() {
    let (author, store) = author(vec![Reply::Text("I'd suggest a few steps.")]);
    let err = author
        .draft_workflow("wf-1", "Something", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthorError::Authoring(AuthoringError::Unparseable { .. })
    ));
    assert_eq!(store.proposal_count(), 0);
}

#[test]
fn default_config_matches_stage_defaults() {
    let config = AuthoringConfig::default();
    assert_eq!(config.proposal_ttl_secs, 300);
    assert_eq!(config.window_size, 5);
    assert_eq!(config.intent.max_tokens, 600);
    assert_eq!(config.tool_usage.temperature, 0.2);
}

#[test]
fn oversized_proposal_ttl_saturates() {
    let config = AuthoringConfig {
        proposal_ttl_secs: i64::MAX,
        ..AuthoringConfig::default()
    };
    assert_eq!(config.proposal_ttl(), Duration::MAX);

    let config = AuthoringConfig {
        proposal_ttl_secs: -5,
        ..AuthoringConfig::default()
    };
    assert_eq!(config.proposal_ttl(), Duration::zero());
}
