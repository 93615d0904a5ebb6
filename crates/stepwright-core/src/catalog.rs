//! Read-only view of the external tool catalog.

use crate::{ApplyError, ToolRef, WorkflowDag};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: String,
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolDefinition {
    pub fn tool_ref(&self) -> ToolRef {
        ToolRef::new(&self.id, &self.version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn lookup(&self, tool: &ToolRef) -> Option<&ToolDefinition> {
        self.tools
            .iter()
            .find(|t| t.id == tool.id && t.version == tool.version)
    }

    pub fn contains(&self, tool: &ToolRef) -> bool {
        self.lookup(tool).is_some()
    }

    /// Every `(step_id, tool)` pair in `dag` that the catalog cannot resolve.
    pub fn unknown_refs<'a>(&self, dag: &'a WorkflowDag) -> Vec<(&'a str, &'a ToolRef)> {
        dag.steps
            .iter()
            .flat_map(|s| s.tools.iter().map(move |t| (s.id.as_str(), t)))
            .filter(|(_, t)| !self.contains(t))
            .collect()
    }

    /// Fail on the first unresolvable tool reference that `dag` adds over
    /// `base`. Refs a step already carried in `base` are left alone, so a
    /// catalog that moved on does not block unrelated edits.
    pub fn check_new_refs(
        &self,
        base: &WorkflowDag,
        dag: &WorkflowDag,
    ) -> Result<(), ApplyError> {
        let added = self.unknown_refs(dag).into_iter().find(|(step_id, tool)| {
            base.find_step(step_id)
                .is_none_or(|before| !before.tools.contains(tool))
        });
        match added {
            Some((step_id, tool)) => Err(ApplyError::UnknownToolRef {
                step_id: step_id.to_string(),
                tool: tool.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkflowStep;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![ToolDefinition {
            id: "web_search".into(),
            version: "1".into(),
            name: "Web search".into(),
            description: None,
        }])
    }

    #[test]
    fn lookup_matches_id_and_version() {
        let catalog = catalog();
        assert!(catalog.contains(&ToolRef::new("web_search", "1")));
        assert!(!catalog.contains(&ToolRef::new("web_search", "2")));
    }

    #[test]
    fn unknown_refs_lists_every_unresolved_pair() {
        let dag = WorkflowDag::new(vec![
            WorkflowStep::new("A", "a")
                .with_id("a")
                .with_tools(vec![ToolRef::new("web_search", "1"), ToolRef::new("fax", "9")]),
        ]);
        let fax = ToolRef::new("fax", "9");
        assert_eq!(catalog().unknown_refs(&dag), vec![("a", &fax)]);
    }

    #[test]
    fn check_new_refs_reports_added_unknown_tool() {
        let base = WorkflowDag::new(vec![WorkflowStep::new("A", "a").with_id("a")]);
        let dag = WorkflowDag::new(vec![
            WorkflowStep::new("A", "a")
                .with_id("a")
                .with_tools(vec![ToolRef::new("web_search", "1"), ToolRef::new("fax", "9")]),
        ]);
        assert_eq!(
            catalog().check_new_refs(&base, &dag),
            Err(ApplyError::UnknownToolRef {
                step_id: "a".into(),
                tool: "fax@9".into()
            })
        );
    }

    #[test]
    fn check_new_refs_ignores_refs_already_in_base() {
        let stale = WorkflowStep::new("A", "a")
            .with_id("a")
            .with_tools(vec![ToolRef::new("web_search", "0")]);
        let base = WorkflowDag::new(vec![stale.clone()]);
        let dag = WorkflowDag::new(vec![stale, WorkflowStep::new("B", "b").with_id("b")]);
        assert_eq!(catalog().check_new_refs(&base, &dag), Ok(()));

        let moved = WorkflowDag::new(vec![
            WorkflowStep::new("B", "b")
                .with_id("b")
                .with_tools(vec![ToolRef::new("web_search", "0")]),
        ]);
        assert!(catalog().check_new_refs(&base, &moved).is_err());
    }
}
