use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

pub type StepId = String;

/// Allocate a fresh step id. Ids are never reused, so a deleted step's id
/// cannot come back as a different step.
pub fn new_step_id() -> StepId {
    Uuid::new_v4().to_string()
}

/// Reference into the external tool catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolRef {
    pub id: String,
    /// Models sometimes emit `"version": 1`; numbers are accepted and kept
    /// as their decimal string.
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

impl ToolRef {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ToolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: StepId,
    pub name: String,
    pub instruction: String,
    /// Unordered set of tool references. Empty means a prompt-only step.
    #[serde(default)]
    pub tools: Vec<ToolRef>,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            id: new_step_id(),
            name: name.into(),
            instruction: instruction.into(),
            tools: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn depending_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolRef>) -> Self {
        self.tools = dedup_tools(tools);
        self
    }

    /// Set union on `{id, version}`.
    pub fn add_tools(&mut self, tools: &[ToolRef]) {
        for tool in tools {
            if !self.tools.contains(tool) {
                self.tools.push(tool.clone());
            }
        }
    }

    /// Set difference on `{id, version}`.
    pub fn remove_tools(&mut self, tools: &[ToolRef]) {
        self.tools.retain(|t| !tools.contains(t));
    }
}

pub(crate) fn dedup_tools(tools: Vec<ToolRef>) -> Vec<ToolRef> {
    let mut out: Vec<ToolRef> = Vec::with_capacity(tools.len());
    for tool in tools {
        if !out.contains(&tool) {
            out.push(tool);
        }
    }
    out
}

pub(crate) fn dedup_ids(ids: Vec<StepId>) -> Vec<StepId> {
    let mut out: Vec<StepId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDag {
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDag {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id == id)
    }

    pub fn find_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn find_step_mut(&mut self, id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Reorder `steps` so every step comes after its dependencies, keeping
    /// the existing order wherever the dependencies allow it.
    ///
    /// Returns `false` (and leaves the order untouched) when the graph has a
    /// cycle. Dependencies on ids that are not in the DAG are ignored.
    pub fn sort_topologically(&mut self) -> bool {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                if let Some(&d) = index.get(dep.as_str()) {
                    indegree[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &child in &dependents[next] {
                indegree[child] -= 1;
                if indegree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() != self.steps.len() {
            return false;
        }

        let mut slots: Vec<Option<WorkflowStep>> = self.steps.drain(..).map(Some).collect();
        self.steps = order.into_iter().filter_map(|i| slots[i].take()).collect();
        true
    }
}

/// A workflow as the record store sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Current version id. `None` until the first DAG write.
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default)]
    pub dag: WorkflowDag,
}

impl WorkflowRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            version_id: None,
            dag: WorkflowDag::default(),
        }
    }
}
