mod error;
mod intent;
mod parse;
mod prompt;
mod request;
mod step_plan;
mod tool_calls;
mod tool_usage;

pub mod conversation;


pub use error::AuthoringError;
pub use intent::generate_workflow_intent;
pub use parse::{looks_like_json, parse_intent, parse_step_plan, parse_tool_usage, strip_code_fence};
pub use prompt::{
    NO_STEPS, NO_TOOLS, format_steps, format_tools, intent_prompt, step_plan_prompt,
    tool_call_prompt, tool_usage_prompt,
};
pub use step_plan::{generate_workflow_step_plan, plan_to_tool_calls};
pub use tool_calls::{
    generate_workflow_tool_calls, normalize_tool_call, normalize_tool_call_value,
    normalize_tool_calls, workflow_tool_schemas,
};
pub use tool_usage::generate_workflow_step_tool_usage;

use crate::ChatOptions;
use serde::{Deserialize, Serialize};
use stepwright_core::{NormalizedToolCall, StepId, ToolCatalog, ToolRef, WorkflowDag, WorkflowStep};

// ── Public types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowIntent {
    ModifyWorkflow,
    AskClarifying,
    AnswerOnly,
}

impl WorkflowIntent {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "modify_workflow" => Some(Self::ModifyWorkflow),
            "ask_clarifying" => Some(Self::AskClarifying),
            "answer_only" => Some(Self::AnswerOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModifyWorkflow => "modify_workflow",
            Self::AskClarifying => "ask_clarifying",
            Self::AnswerOnly => "answer_only",
        }
    }
}

/// Transient classifier output. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowIntentResult {
    pub intent: WorkflowIntent,
    #[serde(default)]
    pub assistant_message: String,
    #[serde(default)]
    pub clarification_question: Option<String>,
}

/// Per-step tool decision. `use_tools == false` implies `tools` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowToolUsageDecision {
    pub step_id: StepId,
    pub use_tools: bool,
    #[serde(default)]
    pub tools: Vec<ToolRef>,
}

impl WorkflowToolUsageDecision {
    pub fn no_tools(step_id: impl Into<StepId>) -> Self {
        Self {
            step_id: step_id.into(),
            use_tools: false,
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUsageResult {
    pub steps: Vec<WorkflowToolUsageDecision>,
}

/// One step of a from-scratch plan. `temp_id` lets later plan steps depend
/// on earlier ones before real ids exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepPlan {
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub name: String,
    pub instruction: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPlanResult {
    pub steps: Vec<WorkflowStepPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallsResult {
    pub assistant_message: String,
    pub tool_calls: Vec<NormalizedToolCall>,
}

/// Everything a stage prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct AuthoringInput<'a> {
    pub user_message: &'a str,
    pub workflow_name: &'a str,
    pub workflow_description: Option<&'a str>,
    pub dag: &'a WorkflowDag,
    pub available_tools: &'a ToolCatalog,
    pub conversation_context: Option<&'a str>,
}

impl<'a> AuthoringInput<'a> {
    pub fn steps(&self) -> &'a [WorkflowStep] {
        &self.dag.steps
    }
}

/// Sampling settings for one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl StageOptions {
    pub const INTENT: Self = Self::new(0.2, 600);
    pub const TOOL_CALLS: Self = Self::new(0.3, 2000);
    pub const TOOL_USAGE: Self = Self::new(0.2, 1200);
    pub const STEP_PLAN: Self = Self::new(0.3, 2000);

    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions::new(self.temperature, self.max_tokens)
    }
}
