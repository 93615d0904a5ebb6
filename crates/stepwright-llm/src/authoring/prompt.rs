use super::AuthoringInput;
use std::fmt::Write;
use stepwright_core::{ToolCatalog, ToolRef, WorkflowStep};

pub const NO_STEPS: &str = "No steps yet.";
pub const NO_TOOLS: &str = "No tools available.";

pub(crate) const SYSTEM_PROMPT: &str = "You are a workflow authoring assistant. \
A workflow is a DAG of deterministic steps. Each step has a name, an instruction, \
optional tools and the ids of the steps it depends on.";

/// Render steps as a numbered list. Tool names are resolved through the
/// catalog; unknown refs fall back to the tool id.
pub fn format_steps(steps: &[WorkflowStep], catalog: &ToolCatalog) -> String {
    if steps.is_empty() {
        return NO_STEPS.to_string();
    }

    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let depends_on = if step.depends_on.is_empty() {
                "none".to_string()
            } else {
                step.depends_on.join(", ")
            };
            let tools = if step.tools.is_empty() {
                "none".to_string()
            } else {
                step.tools
                    .iter()
                    .map(|t| format!("{} ({})", tool_name(t, catalog), t))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "{}. \"{}\" (id: {})\n  - instruction: {}\n  - depends on: {}\n  - tools: {}",
                i + 1,
                step.name,
                step.id,
                step.instruction,
                depends_on,
                tools
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_tools(catalog: &ToolCatalog) -> String {
    if catalog.is_empty() {
        return NO_TOOLS.to_string();
    }

    catalog
        .tools()
        .iter()
        .map(|t| match t.description.as_deref() {
            Some(desc) if !desc.trim().is_empty() => {
                format!("- {} ({}@{}): {}", t.name, t.id, t.version, desc.trim())
            }
            _ => format!("- {} ({}@{})", t.name, t.id, t.version),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn tool_name<'a>(tool: &'a ToolRef, catalog: &'a ToolCatalog) -> &'a str {
    catalog
        .lookup(tool)
        .map(|t| t.name.as_str())
        .unwrap_or(tool.id.as_str())
}

fn write_header(out: &mut String, name: &str, description: Option<&str>) {
    let _ = writeln!(out, "Workflow: \"{}\"", name);
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(desc) => {
            let _ = writeln!(out, "Description: {}", desc);
        }
        None => out.push_str("Description: (none)\n"),
    }
}

fn write_context(out: &mut String, conversation_context: Option<&str>, user_message: &str) {
    if let Some(ctx) = conversation_context.map(str::trim).filter(|c| !c.is_empty()) {
        let _ = write!(out, "\nRecent conversation:\n{}\n", ctx);
    }
    let _ = write!(out, "\nUser message:\n{}", user_message.trim());
}

fn workflow_state(input: &AuthoringInput<'_>) -> String {
    let mut out = String::new();
    write_header(&mut out, input.workflow_name, input.workflow_description);
    let _ = write!(
        out,
        "\nCurrent steps:\n{}\n\nAvailable tools:\n{}\n",
        format_steps(input.steps(), input.available_tools),
        format_tools(input.available_tools)
    );
    write_context(&mut out, input.conversation_context, input.user_message);
    out
}

pub fn intent_prompt(input: &AuthoringInput<'_>) -> String {
    format!(
        r#"Decide what the user wants from this workflow chat message.

Intents:
- "modify_workflow": the message clearly asks to add, change, remove or reorder steps.
- "ask_clarifying": the message asks for a change but is too vague to act on.
- "answer_only": the message is a question or remark that needs no change.

Respond with ONLY a JSON object:
{{"intent": "modify_workflow" | "ask_clarifying" | "answer_only", "assistantMessage": "<reply to the user>", "clarificationQuestion": "<question>" | null}}

Set "clarificationQuestion" only for "ask_clarifying".

{}"#,
        workflow_state(input)
    )
}

pub fn tool_call_prompt(input: &AuthoringInput<'_>) -> String {
    format!(
        r#"Edit the workflow to satisfy the user message by calling the provided tools.

Rules:
- Use add_step, update_step, delete_step and reorder_steps. Emit every change the message needs.
- Refer to existing steps by their id. To depend on a step you add in the same response, give it a "tempId" and use that tempId in "dependsOn".
- Only attach tools that appear in the available tools list, as {{"id": ..., "version": ...}}.
- When deleting a step, use rewireStrategy "auto" unless the user names the step its dependents should move to.
- Never create a cycle or depend on a step that does not exist.
- Also write one or two sentences telling the user what you changed.

{}"#,
        workflow_state(input)
    )
}

pub fn tool_usage_prompt(input: &AuthoringInput<'_>, steps: &[WorkflowStep]) -> String {
    let mut out = String::from(
        r#"Decide for each step below whether it should use external tools.

Default to NO tools. Attach tools only when the user explicitly asked for them, or when the step clearly needs external data or an external action to be reliable. Summarizing, drafting, rewriting or reasoning over earlier results needs no tools.

Respond with ONLY a JSON object listing every step exactly once:
{"steps": [{"stepId": "<id>", "useTools": true | false, "tools": [{"id": "<tool id>", "version": "<tool version>"}]}]}

When "useTools" is false, "tools" must be [].

"#,
    );
    write_header(&mut out, input.workflow_name, input.workflow_description);
    let _ = write!(
        out,
        "\nSteps to classify:\n{}\n\nAvailable tools:\n{}\n",
        format_steps(steps, input.available_tools),
        format_tools(input.available_tools)
    );
    write_context(&mut out, input.conversation_context, input.user_message);
    out
}

pub fn step_plan_prompt(
    user_message: &str,
    workflow_name: &str,
    workflow_description: Option<&str>,
    available_tools: &ToolCatalog,
    conversation_context: Option<&str>,
) -> String {
    let mut out = String::from(
        r#"Plan the steps of a workflow that does what the user describes.

Respond with ONLY a JSON object:
{"steps": [{"tempId": "s1", "name": "<short name>", "instruction": "<what the step does>", "dependsOn": ["<tempId of an earlier step>"]}]}

Keep steps small and deterministic. A step may only depend on steps listed before it. Do not choose tools here.

"#,
    );
    write_header(&mut out, workflow_name, workflow_description);
    let _ = write!(out, "\nAvailable tools:\n{}\n", format_tools(available_tools));
    write_context(&mut out, conversation_context, user_message);
    out
}
