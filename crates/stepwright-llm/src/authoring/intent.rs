use super::parse::{looks_like_json, parse_intent};
use super::prompt::{SYSTEM_PROMPT, intent_prompt};
use super::request::complete_text;
use super::{AuthoringError, AuthoringInput, StageOptions, WorkflowIntent, WorkflowIntentResult};
use crate::{ChatBackend, Message};
use tracing::{info, warn};

const STAGE: &str = "intent";

pub(crate) const FALLBACK_MESSAGE: &str = "I can update the workflow. What should I change?";
pub(crate) const FALLBACK_QUESTION: &str = "What should I change in this workflow?";

fn clarify_fallback() -> WorkflowIntentResult {
    WorkflowIntentResult {
        intent: WorkflowIntent::AskClarifying,
        assistant_message: FALLBACK_MESSAGE.to_string(),
        clarification_question: Some(FALLBACK_QUESTION.to_string()),
    }
}

/// Classify a workflow chat message.
///
/// Provider failures are errors. Parse failures are not: output that
/// attempted JSON becomes a clarifying question, and plain prose is taken
/// as a direct answer. Empty output is treated as broken structure.
pub async fn generate_workflow_intent(
    backend: &impl ChatBackend,
    input: &AuthoringInput<'_>,
    options: StageOptions,
) -> Result<WorkflowIntentResult, AuthoringError> {
    let messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(intent_prompt(input)),
    ];
    let raw = complete_text(backend, STAGE, messages, options).await?;

    let result = match parse_intent(&raw) {
        Some(result) => result,
        None if raw.trim().is_empty() || looks_like_json(&raw) => {
            warn!(raw_len = raw.len(), "Intent output unparseable, asking for clarification");
            clarify_fallback()
        }
        None => WorkflowIntentResult {
            intent: WorkflowIntent::AnswerOnly,
            assistant_message: raw,
            clarification_question: None,
        },
    };

    info!(intent = result.intent.as_str(), "Classified workflow message");
    Ok(result)
}
