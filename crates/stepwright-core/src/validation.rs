use crate::WorkflowDag;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Step id {0} is used by more than one step")]
    DuplicateStepId(String),

    #[error("Step {step_id} depends on unknown step {dependency}")]
    DanglingDependency { step_id: String, dependency: String },

    #[error("Cycle detected in workflow at step {0}")]
    CycleDetected(String),
}

/// Check referential integrity and acyclicity of a DAG.
pub fn validate_dag(dag: &WorkflowDag) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for step in &dag.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &dag.steps {
        for dep in &step.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(ValidationError::DanglingDependency {
                    step_id: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Iterative DFS with three colors: absent = unvisited, false = on the
    // current path, true = finished.
    let deps: HashMap<&str, &[String]> = dag
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
        .collect();
    let mut state: HashMap<&str, bool> = HashMap::new();

    for step in &dag.steps {
        if state.contains_key(step.id.as_str()) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(step.id.as_str(), 0)];
        state.insert(step.id.as_str(), false);

        while let Some((current, next_child)) = stack.pop() {
            let children = deps.get(current).copied().unwrap_or(&[]);
            if next_child >= children.len() {
                state.insert(current, true);
                continue;
            }
            stack.push((current, next_child + 1));
            let child = children[next_child].as_str();
            match state.get(child) {
                Some(false) => return Err(ValidationError::CycleDetected(child.to_string())),
                Some(true) => {}
                None => {
                    state.insert(child, false);
                    stack.push((child, 0));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkflowStep;

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep::new(id.to_uppercase(), format!("do {id}"))
            .with_id(id)
            .depending_on(deps.iter().copied())
    }

    #[test]
    fn empty_dag_is_valid() {
        assert!(validate_dag(&WorkflowDag::default()).is_ok());
    }

    #[test]
    fn diamond_is_valid() {
        let dag = WorkflowDag::new(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        assert!(validate_dag(&dag).is_ok());
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let dag = WorkflowDag::new(vec![step("a", &["ghost"])]);
        assert_eq!(
            validate_dag(&dag),
            Err(ValidationError::DanglingDependency {
                step_id: "a".into(),
                dependency: "ghost".into()
            })
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let dag = WorkflowDag::new(vec![step("a", &["a"])]);
        assert!(matches!(
            validate_dag(&dag),
            Err(ValidationError::CycleDetected(_))
        ));
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let dag = WorkflowDag::new(vec![
            step("a", &["c"]),
            step("b", &["a"]),
            step("c", &["b"]),
        ]);
        assert!(matches!(
            validate_dag(&dag),
            Err(ValidationError::CycleDetected(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dag = WorkflowDag::new(vec![step("a", &[]), step("a", &[])]);
        assert_eq!(
            validate_dag(&dag),
            Err(ValidationError::DuplicateStepId("a".into()))
        );
    }
}
