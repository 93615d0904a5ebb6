use super::{AuthoringError, StageOptions};
use crate::{ChatBackend, Message};
use serde_json::Value;
use tracing::debug;

/// One non-retried completion. Returns the first choice's message.
/// `stage` is used for log messages and error reporting.
pub(crate) async fn complete(
    backend: &impl ChatBackend,
    stage: &'static str,
    messages: Vec<Message>,
    tools: Option<Vec<Value>>,
    options: StageOptions,
) -> Result<Message, AuthoringError> {
    let response = backend
        .chat_with_options(messages, tools, options.chat_options())
        .await
        .map_err(AuthoringError::RequestFailed)?;

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(AuthoringError::EmptyResponse { stage })?;

    debug!(
        stage,
        model = backend.model_name(),
        content_len = message.text_content().map(str::len).unwrap_or(0),
        tool_calls = message.tool_calls.as_ref().map(Vec::len).unwrap_or(0),
        "LLM stage output"
    );

    Ok(message)
}

/// Like [`complete`], but the stage only cares about text content.
pub(crate) async fn complete_text(
    backend: &impl ChatBackend,
    stage: &'static str,
    messages: Vec<Message>,
    options: StageOptions,
) -> Result<String, AuthoringError> {
    let message = complete(backend, stage, messages, None, options).await?;
    Ok(message.content.unwrap_or_default())
}
