use super::parse::parse_step_plan;
use super::prompt::{SYSTEM_PROMPT, step_plan_prompt};
use super::request::complete_text;
use super::{AuthoringError, StageOptions, StepPlanResult, WorkflowStepPlan};
use crate::{ChatBackend, Message};
use stepwright_core::{AddStepArgs, NormalizedToolCall, ToolCatalog, WorkflowToolCall};
use tracing::info;

const STAGE: &str = "step plan";

/// Plan a workflow from a description. An unparseable or empty plan is an
/// error.
pub async fn generate_workflow_step_plan(
    backend: &impl ChatBackend,
    user_message: &str,
    workflow_name: &str,
    workflow_description: Option<&str>,
    available_tools: &ToolCatalog,
    conversation_context: Option<&str>,
    options: StageOptions,
) -> Result<StepPlanResult, AuthoringError> {
    let prompt = step_plan_prompt(
        user_message,
        workflow_name,
        workflow_description,
        available_tools,
        conversation_context,
    );
    let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];
    let raw = complete_text(backend, STAGE, messages, options).await?;
    if raw.trim().is_empty() {
        return Err(AuthoringError::EmptyResponse { stage: STAGE });
    }

    let plan = parse_step_plan(&raw)
        .filter(|p| !p.steps.is_empty())
        .ok_or(AuthoringError::Unparseable { stage: STAGE })?;

    info!(steps = plan.steps.len(), "Generated step plan");
    Ok(plan)
}

/// Turn plan steps into `add_step` calls. Plan ids become temp ids so
/// dependencies resolve within the batch; steps without one get `plan_<n>`.
pub fn plan_to_tool_calls(steps: &[WorkflowStepPlan]) -> Vec<NormalizedToolCall> {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let temp_id = step
                .temp_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("plan_{}", i + 1));
            WorkflowToolCall::AddStep(AddStepArgs {
                name: step.name.trim().to_string(),
                instruction: step.instruction.trim().to_string(),
                temp_id: Some(temp_id),
                tools: None,
                depends_on: (!step.depends_on.is_empty()).then(|| step.depends_on.clone()),
                position: None,
            })
            .to_normalized()
        })
        .collect()
}
