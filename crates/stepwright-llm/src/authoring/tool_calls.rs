use super::parse::strip_code_fence;
use super::prompt::{SYSTEM_PROMPT, tool_call_prompt};
use super::request::complete;
use super::{AuthoringError, AuthoringInput, StageOptions, ToolCallsResult};
use crate::{ChatBackend, Message, ToolCall};
use serde_json::{Value, json};
use stepwright_core::{
    ADD_STEP, DELETE_STEP, NormalizedToolCall, REORDER_STEPS, UPDATE_STEP, describe_tool_calls,
};
use tracing::{debug, info};

const STAGE: &str = "tool calls";

fn tool_ref_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "version": {"type": "string"}
        },
        "required": ["id", "version"],
        "additionalProperties": false
    })
}

fn tool_refs_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "items": tool_ref_schema(),
        "description": description
    })
}

fn step_ids_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "description": description
    })
}

fn function(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters
        }
    })
}

/// The fixed edit tool set offered to the model, in OpenAI function format.
pub fn workflow_tool_schemas() -> Vec<Value> {
    vec![
        function(
            ADD_STEP,
            "Add a new step to the workflow.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Short step name"},
                    "instruction": {"type": "string", "description": "What the step does"},
                    "tempId": {"type": "string", "description": "Id other calls in this response can use to refer to the new step"},
                    "tools": tool_refs_schema("Tools the step uses"),
                    "dependsOn": step_ids_schema("Ids or tempIds of steps this step depends on"),
                    "position": {"type": "integer", "minimum": 0, "description": "Zero-based insertion index in the step list"}
                },
                "required": ["name", "instruction"],
                "additionalProperties": false
            }),
        ),
        function(
            UPDATE_STEP,
            "Change an existing step. Use either tools (replace) or addTools/removeTools, not both.",
            json!({
                "type": "object",
                "properties": {
                    "stepId": {"type": "string"},
                    "name": {"type": "string"},
                    "instruction": {"type": "string"},
                    "tools": tool_refs_schema("Replacement tool list"),
                    "addTools": tool_refs_schema("Tools to attach"),
                    "removeTools": tool_refs_schema("Tools to detach"),
                    "dependsOn": step_ids_schema("Replacement dependency list")
                },
                "required": ["stepId"],
                "additionalProperties": false
            }),
        ),
        function(
            DELETE_STEP,
            "Delete a step. Steps that depended on it are rewired.",
            json!({
                "type": "object",
                "properties": {
                    "stepId": {"type": "string"},
                    "rewireStrategy": {
                        "type": "string",
                        "enum": ["auto", "manual"],
                        "description": "auto: dependents inherit the deleted step's dependencies. manual: dependents move to rewireToStepId."
                    },
                    "rewireToStepId": {"type": "string"}
                },
                "required": ["stepId"],
                "additionalProperties": false
            }),
        ),
        function(
            REORDER_STEPS,
            "Replace a step's dependencies to move it within the DAG.",
            json!({
                "type": "object",
                "properties": {
                    "stepId": {"type": "string"},
                    "newDependsOn": step_ids_schema("New dependency list")
                },
                "required": ["stepId", "newDependsOn"],
                "additionalProperties": false
            }),
        ),
    ]
}

/// Arguments may arrive as a JSON object or as a JSON-encoded string.
fn decode_args(name: &str, args: Option<&Value>) -> Result<Value, AuthoringError> {
    match args {
        None | Some(Value::Null) => Ok(json!({})),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(json!({})),
        Some(Value::String(s)) => {
            serde_json::from_str(s).map_err(|e| AuthoringError::MalformedToolCall {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }
        Some(other) => Ok(other.clone()),
    }
}

/// Normalize one OpenAI wire tool call.
pub fn normalize_tool_call(call: &ToolCall) -> Result<NormalizedToolCall, AuthoringError> {
    let raw = Value::String(call.function.arguments.clone());
    let args = decode_args(&call.function.name, Some(&raw))?;
    Ok(NormalizedToolCall::new(call.function.name.clone(), args))
}

pub fn normalize_tool_calls(calls: &[ToolCall]) -> Result<Vec<NormalizedToolCall>, AuthoringError> {
    calls.iter().map(normalize_tool_call).collect()
}

/// Normalize a tool call in any of the shapes providers emit:
/// `{function: {name, arguments}}`, `{toolName, input}` or
/// `{name, args | arguments | input}`.
pub fn normalize_tool_call_value(value: &Value) -> Result<NormalizedToolCall, AuthoringError> {
    let source = value.get("function").filter(|f| f.is_object()).unwrap_or(value);

    let name = ["name", "toolName"]
        .iter()
        .find_map(|key| source.get(*key).and_then(Value::as_str))
        .ok_or_else(|| AuthoringError::MalformedToolCall {
            name: "<unnamed>".to_string(),
            reason: "missing tool name".to_string(),
        })?;

    let args = ["args", "arguments", "input"]
        .iter()
        .find_map(|key| source.get(*key));
    let args = decode_args(name, args)?;
    if !args.is_object() {
        return Err(AuthoringError::MalformedToolCall {
            name: name.to_string(),
            reason: "arguments are not an object".to_string(),
        });
    }

    Ok(NormalizedToolCall::new(name, args))
}

/// Some servers ignore native tool calling and answer with
/// `{"assistantMessage": ..., "toolCalls": [...]}` in the content.
fn tool_calls_from_content(content: &str) -> Option<(Option<String>, Vec<Value>)> {
    let stripped = strip_code_fence(content);
    let first = stripped.find('{')?;
    let last = stripped.rfind('}')?;
    if last <= first {
        return None;
    }
    let value: Value = serde_json::from_str(&stripped[first..=last]).ok()?;
    let calls = value.get("toolCalls")?.as_array()?.clone();
    let message = value
        .get("assistantMessage")
        .and_then(Value::as_str)
        .map(String::from);
    Some((message, calls))
}

/// Ask the model for the edit calls that satisfy the user message. Produces
/// the call list only; nothing is applied here.
pub async fn generate_workflow_tool_calls(
    backend: &impl ChatBackend,
    input: &AuthoringInput<'_>,
    options: StageOptions,
) -> Result<ToolCallsResult, AuthoringError> {
    let messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(tool_call_prompt(input)),
    ];
    let message = complete(
        backend,
        STAGE,
        messages,
        Some(workflow_tool_schemas()),
        options,
    )
    .await?;

    let content = message
        .text_content()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let (tool_calls, text) = match message.tool_calls.as_deref() {
        Some(calls) if !calls.is_empty() => (normalize_tool_calls(calls)?, content.map(String::from)),
        _ => match content.and_then(tool_calls_from_content) {
            Some((text, raw)) => {
                debug!(count = raw.len(), "Tool calls recovered from message content");
                let calls = raw
                    .iter()
                    .map(normalize_tool_call_value)
                    .collect::<Result<Vec<_>, _>>()?;
                (calls, text)
            }
            None => (Vec::new(), content.map(String::from)),
        },
    };

    let assistant_message = text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| describe_tool_calls(&tool_calls));

    info!(tool_calls = tool_calls.len(), "Generated workflow tool calls");
    Ok(ToolCallsResult {
        assistant_message,
        tool_calls,
    })
}
