use super::parse::parse_tool_usage;
use super::prompt::{SYSTEM_PROMPT, tool_usage_prompt};
use super::request::complete_text;
use super::{
    AuthoringError, AuthoringInput, StageOptions, ToolUsageResult, WorkflowToolUsageDecision,
};
use crate::{ChatBackend, Message};
use std::collections::HashMap;
use stepwright_core::{ToolCatalog, WorkflowStep};
use tracing::{info, warn};

const STAGE: &str = "tool usage";

/// Decide per step whether tools are attached. Unlike intent
/// classification there is no safe default for unparseable output, so a
/// parse failure is an error.
pub async fn generate_workflow_step_tool_usage(
    backend: &impl ChatBackend,
    input: &AuthoringInput<'_>,
    steps: &[WorkflowStep],
    options: StageOptions,
) -> Result<ToolUsageResult, AuthoringError> {
    if steps.is_empty() {
        return Ok(ToolUsageResult::default());
    }

    let messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(tool_usage_prompt(input, steps)),
    ];
    let raw = complete_text(backend, STAGE, messages, options).await?;
    if raw.trim().is_empty() {
        return Err(AuthoringError::EmptyResponse { stage: STAGE });
    }

    let parsed = parse_tool_usage(&raw).ok_or(AuthoringError::Unparseable { stage: STAGE })?;
    let result = reconcile(parsed, steps, input.available_tools);

    info!(
        steps = result.steps.len(),
        with_tools = result.steps.iter().filter(|s| s.use_tools).count(),
        "Classified step tool usage"
    );
    Ok(result)
}

/// Exactly one decision per candidate step, in step order. Unknown or
/// repeated step ids are dropped, missing steps get no tools, and tools the
/// catalog cannot resolve are removed.
pub(crate) fn reconcile(
    parsed: ToolUsageResult,
    steps: &[WorkflowStep],
    catalog: &ToolCatalog,
) -> ToolUsageResult {
    let mut by_step: HashMap<String, WorkflowToolUsageDecision> = HashMap::new();
    for decision in parsed.steps {
        if !steps.iter().any(|s| s.id == decision.step_id) {
            warn!(step_id = %decision.step_id, "Tool usage for unknown step dropped");
            continue;
        }
        if by_step.contains_key(&decision.step_id) {
            warn!(step_id = %decision.step_id, "Duplicate tool usage decision dropped");
            continue;
        }
        by_step.insert(decision.step_id.clone(), decision);
    }

    let steps = steps
        .iter()
        .map(|step| {
            let Some(mut decision) = by_step.remove(&step.id) else {
                warn!(step_id = %step.id, "No tool usage decision, defaulting to no tools");
                return WorkflowToolUsageDecision::no_tools(step.id.clone());
            };

            let mut tools = Vec::new();
            for tool in decision.tools.drain(..) {
                if !catalog.contains(&tool) {
                    warn!(step_id = %step.id, tool = %tool, "Unknown tool dropped");
                } else if !tools.contains(&tool) {
                    tools.push(tool);
                }
            }

            decision.use_tools = decision.use_tools && !tools.is_empty();
            if !decision.use_tools {
                tools.clear();
            }
            decision.tools = tools;
            decision
        })
        .collect();

    ToolUsageResult { steps }
}
