use crate::{ApplyError, ToolRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ADD_STEP: &str = "add_step";
pub const UPDATE_STEP: &str = "update_step";
pub const DELETE_STEP: &str = "delete_step";
pub const REORDER_STEPS: &str = "reorder_steps";

/// Provider-independent tool call: a tool name plus its decoded JSON
/// arguments. This is the shape proposals persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl NormalizedToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewireStrategy {
    /// Dependents of the deleted step inherit its dependencies.
    #[default]
    Auto,
    /// Dependents of the deleted step are pointed at `rewireToStepId`.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddStepArgs {
    pub name: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    /// Zero-based insertion index into the step list; appended when absent
    /// or past the end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateStepArgs {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Replaces the tool list wholesale. Mutually exclusive with
    /// `add_tools`/`remove_tools`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_tools: Option<Vec<ToolRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_tools: Option<Vec<ToolRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteStepArgs {
    pub step_id: String,
    #[serde(default)]
    pub rewire_strategy: RewireStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewire_to_step_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReorderStepsArgs {
    pub step_id: String,
    pub new_depends_on: Vec<String>,
}

/// A decoded DAG edit.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowToolCall {
    AddStep(AddStepArgs),
    UpdateStep(UpdateStepArgs),
    DeleteStep(DeleteStepArgs),
    ReorderSteps(ReorderStepsArgs),
}

impl WorkflowToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowToolCall::AddStep(_) => ADD_STEP,
            WorkflowToolCall::UpdateStep(_) => UPDATE_STEP,
            WorkflowToolCall::DeleteStep(_) => DELETE_STEP,
            WorkflowToolCall::ReorderSteps(_) => REORDER_STEPS,
        }
    }

    pub fn from_normalized(call: &NormalizedToolCall) -> Result<Self, ApplyError> {
        fn decode<T: serde::de::DeserializeOwned>(call: &NormalizedToolCall) -> Result<T, ApplyError> {
            serde_json::from_value::<T>(call.args.clone()).map_err(|e| {
                ApplyError::InvalidArguments {
                    tool: call.name.clone(),
                    reason: e.to_string(),
                }
            })
        }

        match call.name.as_str() {
            ADD_STEP => decode(call).map(WorkflowToolCall::AddStep),
            UPDATE_STEP => decode(call).map(WorkflowToolCall::UpdateStep),
            DELETE_STEP => decode(call).map(WorkflowToolCall::DeleteStep),
            REORDER_STEPS => decode(call).map(WorkflowToolCall::ReorderSteps),
            other => Err(ApplyError::UnknownTool(other.to_string())),
        }
    }

    pub fn to_normalized(&self) -> NormalizedToolCall {
        let args = match self {
            WorkflowToolCall::AddStep(a) => serde_json::to_value(a),
            WorkflowToolCall::UpdateStep(a) => serde_json::to_value(a),
            WorkflowToolCall::DeleteStep(a) => serde_json::to_value(a),
            WorkflowToolCall::ReorderSteps(a) => serde_json::to_value(a),
        };
        // Plain derive(Serialize) structs of strings never fail to serialize.
        NormalizedToolCall::new(self.name(), args.unwrap_or(Value::Null))
    }
}

/// One-line description of an edit batch, e.g. "Added 1 step, updated 2 steps."
pub fn describe_tool_calls(calls: &[NormalizedToolCall]) -> String {
    let count = |name: &str| calls.iter().filter(|c| c.name == name).count();
    let plural = |n: usize| if n == 1 { "step" } else { "steps" };

    let mut parts = Vec::new();
    for (name, verb) in [
        (ADD_STEP, "Added"),
        (UPDATE_STEP, "Updated"),
        (DELETE_STEP, "Deleted"),
        (REORDER_STEPS, "Rewired"),
    ] {
        let n = count(name);
        if n > 0 {
            let verb = if parts.is_empty() {
                verb.to_string()
            } else {
                verb.to_lowercase()
            };
            parts.push(format!("{} {} {}", verb, n, plural(n)));
        }
    }

    if parts.is_empty() {
        "No workflow changes.".to_string()
    } else {
        format!("{}.", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_add_step_with_camel_case_fields() {
        let call = NormalizedToolCall::new(
            ADD_STEP,
            json!({"name": "Email", "instruction": "Send it", "tempId": "t1", "dependsOn": ["a"]}),
        );
        let WorkflowToolCall::AddStep(args) = WorkflowToolCall::from_normalized(&call).unwrap()
        else {
            panic!("expected add_step");
        };
        assert_eq!(args.temp_id.as_deref(), Some("t1"));
        assert_eq!(args.depends_on, Some(vec!["a".to_string()]));
    }

    #[test]
    fn rejects_extra_fields() {
        let call = NormalizedToolCall::new(
            DELETE_STEP,
            json!({"stepId": "a", "force": true}),
        );
        assert!(matches!(
            WorkflowToolCall::from_normalized(&call),
            Err(ApplyError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn rejects_extra_fields_inside_tool_refs() {
        let call = NormalizedToolCall::new(
            UPDATE_STEP,
            json!({
                "stepId": "a",
                "addTools": [{"id": "web_search", "version": "1", "name": "Web search"}]
            }),
        );
        assert!(matches!(
            WorkflowToolCall::from_normalized(&call),
            Err(ApplyError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let call = NormalizedToolCall::new(REORDER_STEPS, json!({"stepId": "a"}));
        assert!(matches!(
            WorkflowToolCall::from_normalized(&call),
            Err(ApplyError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn rejects_unknown_tool_name() {
        let call = NormalizedToolCall::new("rename_workflow", json!({}));
        assert_eq!(
            WorkflowToolCall::from_normalized(&call),
            Err(ApplyError::UnknownTool("rename_workflow".into()))
        );
    }

    #[test]
    fn delete_defaults_to_auto_rewire() {
        let call = NormalizedToolCall::new(DELETE_STEP, json!({"stepId": "a"}));
        let WorkflowToolCall::DeleteStep(args) = WorkflowToolCall::from_normalized(&call).unwrap()
        else {
            panic!("expected delete_step");
        };
        assert_eq!(args.rewire_strategy, RewireStrategy::Auto);
    }

    #[test]
    fn describe_counts_each_kind() {
        let calls = vec![
            NormalizedToolCall::new(ADD_STEP, json!({})),
            NormalizedToolCall::new(UPDATE_STEP, json!({})),
            NormalizedToolCall::new(UPDATE_STEP, json!({})),
        ];
        assert_eq!(describe_tool_calls(&calls), "Added 1 step, updated 2 steps.");
        assert_eq!(describe_tool_calls(&[]), "No workflow changes.");
    }
}
