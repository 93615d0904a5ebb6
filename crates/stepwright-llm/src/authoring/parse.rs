//! Tolerant extraction of structured output from raw model text.
//!
//! Models wrap JSON in prose or code fences, truncate under the token
//! ceiling, or leave a string unterminated. Every parser here returns
//! `None` instead of failing so each stage can apply its own fallback.

use super::{
    StepPlanResult, ToolUsageResult, WorkflowIntent, WorkflowIntentResult, WorkflowStepPlan,
    WorkflowToolUsageDecision,
};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;

const FENCE: &str = "```";

static INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""intent"\s*:\s*"(modify_workflow|ask_clarifying|answer_only)""#)
        .expect("intent pattern is valid")
});

static ASSISTANT_MESSAGE_FIELD: LazyLock<StringField> =
    LazyLock::new(|| StringField::new("assistantMessage"));

static CLARIFICATION_QUESTION_FIELD: LazyLock<StringField> =
    LazyLock::new(|| StringField::new("clarificationQuestion"));

/// Patterns for a string field in almost-JSON: a properly closed string,
/// and an open string running to end of text (truncated streams).
struct StringField {
    closed: Regex,
    open: Regex,
}

impl StringField {
    fn new(field: &str) -> Self {
        let key = regex::escape(field);
        Self {
            closed: Regex::new(&format!(
                r#""{key}"\s*:\s*"((?:[^"\\]|\\.)*)"\s*(?:,|\}}|$)"#
            ))
            .expect("closed field pattern is valid"),
            open: Regex::new(&format!(r#""{key}"\s*:\s*"((?:[^"\\]|\\.)*)\\?$"#))
                .expect("open field pattern is valid"),
        }
    }

    fn extract(&self, text: &str) -> Option<String> {
        if let Some(m) = self.closed.captures(text).and_then(|c| c.get(1)) {
            return Some(unescape(m.as_str()));
        }
        self.open
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str().trim_end()))
    }
}

/// Strip one surrounding code fence. Content runs from the line after the
/// opening fence to the last fence marker. A malformed fence (no newline,
/// no closing marker) has every marker removed instead.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with(FENCE) {
        return trimmed.to_string();
    }

    let body_start = trimmed.find('\n').map(|i| i + 1);
    let body_end = trimmed.rfind(FENCE).filter(|&i| i >= FENCE.len());
    match (body_start, body_end) {
        (Some(start), Some(end)) if end >= start => trimmed[start..end].trim().to_string(),
        _ => trimmed.replace(FENCE, "").trim().to_string(),
    }
}

/// Strict parse of the outermost `{ ... }` span.
fn parse_json_object(text: &str) -> Option<Value> {
    let stripped = strip_code_fence(text);
    let first = stripped.find('{')?;
    let last = stripped.rfind('}')?;
    if last <= first {
        return None;
    }
    serde_json::from_str::<Value>(&stripped[first..=last])
        .ok()
        .filter(Value::is_object)
}

/// Heuristic for "the model attempted structured output". Deliberately
/// lenient: anything fenced or carrying one of the intent keys counts.
pub fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{')
        || trimmed.starts_with(FENCE)
        || ["\"intent\"", "\"assistantMessage\"", "\"clarificationQuestion\""]
            .iter()
            .any(|key| trimmed.contains(key))
}

pub fn parse_intent(text: &str) -> Option<WorkflowIntentResult> {
    if let Some(value) = parse_json_object(text)
        && let Ok(result) = serde_json::from_value::<WorkflowIntentResult>(value)
    {
        return Some(result);
    }

    let intent = INTENT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| WorkflowIntent::parse(m.as_str()))?;

    Some(WorkflowIntentResult {
        intent,
        assistant_message: ASSISTANT_MESSAGE_FIELD.extract(text).unwrap_or_default(),
        clarification_question: CLARIFICATION_QUESTION_FIELD.extract(text),
    })
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

pub fn parse_tool_usage(text: &str) -> Option<ToolUsageResult> {
    let raw = steps_array(text)?;
    let (mut steps, warnings) = parse_lenient::<WorkflowToolUsageDecision>(&raw);
    log_dropped("tool usage", &warnings);
    for step in &mut steps {
        if !step.use_tools {
            step.tools.clear();
        }
    }
    Some(ToolUsageResult { steps })
}

pub fn parse_step_plan(text: &str) -> Option<StepPlanResult> {
    let raw = steps_array(text)?;
    let (steps, mut warnings) = parse_lenient::<WorkflowStepPlan>(&raw);
    let steps = steps
        .into_iter()
        .filter(|s| {
            let keep = !s.name.trim().is_empty() && !s.instruction.trim().is_empty();
            if !keep {
                warnings.push(format!("'{}' skipped (empty name or instruction)", s.name));
            }
            keep
        })
        .collect();
    log_dropped("step plan", &warnings);
    Some(StepPlanResult { steps })
}

fn steps_array(text: &str) -> Option<Vec<Value>> {
    match parse_json_object(text)? {
        Value::Object(mut obj) => match obj.remove("steps")? {
            Value::Array(items) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Decode each entry independently; malformed entries are skipped with a
/// warning rather than failing the whole array.
fn parse_lenient<T: serde::de::DeserializeOwned>(raw: &[Value]) -> (Vec<T>, Vec<String>) {
    let mut items = Vec::new();
    let mut warnings = Vec::new();
    for (i, val) in raw.iter().enumerate() {
        match serde_json::from_value::<T>(val.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                let label = ["stepId", "tempId", "name"]
                    .iter()
                    .find_map(|key| val.get(*key).and_then(Value::as_str))
                    .map(String::from)
                    .unwrap_or_else(|| format!("#{}", i));
                warnings.push(format!("'{}' skipped (malformed): {}", label, e));
            }
        }
    }
    (items, warnings)
}

fn log_dropped(stage: &str, warnings: &[String]) {
    for w in warnings {
        warn!(stage, "{}", w);
    }
}
