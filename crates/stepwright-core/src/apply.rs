use crate::workflow::{dedup_ids, dedup_tools};
use crate::{
    AddStepArgs, DeleteStepArgs, NormalizedToolCall, ReorderStepsArgs, RewireStrategy, StepId,
    UpdateStepArgs, ValidationError, WorkflowDag, WorkflowStep, WorkflowToolCall, new_step_id,
    validate_dag,
};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("Unknown tool call: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Step {0} not found")]
    UnknownStep(String),

    #[error("Temp id {0} is already in use")]
    DuplicateTempId(String),

    #[error("update_step for {0} sets both tools and addTools/removeTools")]
    ConflictingToolUpdate(String),

    #[error("delete_step for {0} uses manual rewiring without rewireToStepId")]
    MissingRewireTarget(String),

    #[error("delete_step for {0} cannot rewire dependents to the deleted step")]
    SelfRewire(String),

    #[error("Step {step_id} references unknown tool {tool}")]
    UnknownToolRef { step_id: String, tool: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Apply a batch of normalized tool calls to `dag`, producing the next DAG.
///
/// The batch is all-or-nothing: any decode, reference or structural error
/// rejects the whole batch and `dag` is never touched.
pub fn apply_tool_calls(
    dag: &WorkflowDag,
    calls: &[NormalizedToolCall],
) -> Result<WorkflowDag, ApplyError> {
    let typed = calls
        .iter()
        .map(WorkflowToolCall::from_normalized)
        .collect::<Result<Vec<_>, _>>()?;
    apply_workflow_tool_calls(dag, &typed)
}

pub fn apply_workflow_tool_calls(
    dag: &WorkflowDag,
    calls: &[WorkflowToolCall],
) -> Result<WorkflowDag, ApplyError> {
    let mut applier = Applier {
        dag: dag.clone(),
        temp_ids: HashMap::new(),
    };

    for call in calls {
        match call {
            WorkflowToolCall::AddStep(args) => applier.add_step(args)?,
            WorkflowToolCall::UpdateStep(args) => applier.update_step(args)?,
            WorkflowToolCall::DeleteStep(args) => applier.delete_step(args)?,
            WorkflowToolCall::ReorderSteps(args) => applier.reorder_steps(args)?,
        }
    }

    applier.resolve_forward_temp_ids();
    validate_dag(&applier.dag)?;
    applier.dag.sort_topologically();

    debug!(
        calls = calls.len(),
        steps_before = dag.len(),
        steps_after = applier.dag.len(),
        "Applied tool call batch"
    );

    Ok(applier.dag)
}

struct Applier {
    dag: WorkflowDag,
    /// tempId → real step id, for ids minted earlier in the batch.
    temp_ids: HashMap<String, StepId>,
}

impl Applier {
    fn resolve(&self, id: &str) -> StepId {
        self.temp_ids
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn resolve_all(&self, ids: &[String]) -> Vec<StepId> {
        dedup_ids(ids.iter().map(|id| self.resolve(id)).collect())
    }

    fn resolve_existing(&self, id: &str) -> Result<StepId, ApplyError> {
        let resolved = self.resolve(id);
        if self.dag.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(ApplyError::UnknownStep(id.to_string()))
        }
    }

    fn add_step(&mut self, args: &AddStepArgs) -> Result<(), ApplyError> {
        let id = new_step_id();
        if let Some(temp_id) = &args.temp_id {
            if self.temp_ids.contains_key(temp_id) || self.dag.contains(temp_id) {
                return Err(ApplyError::DuplicateTempId(temp_id.clone()));
            }
            self.temp_ids.insert(temp_id.clone(), id.clone());
        }

        let step = WorkflowStep {
            id,
            name: args.name.clone(),
            instruction: args.instruction.clone(),
            tools: dedup_tools(args.tools.clone().unwrap_or_default()),
            depends_on: self.resolve_all(args.depends_on.as_deref().unwrap_or_default()),
        };

        match args.position {
            Some(pos) if pos < self.dag.steps.len() => self.dag.steps.insert(pos, step),
            _ => self.dag.steps.push(step),
        }
        Ok(())
    }

    fn update_step(&mut self, args: &UpdateStepArgs) -> Result<(), ApplyError> {
        if args.tools.is_some() && (args.add_tools.is_some() || args.remove_tools.is_some()) {
            return Err(ApplyError::ConflictingToolUpdate(args.step_id.clone()));
        }

        let id = self.resolve_existing(&args.step_id)?;
        let depends_on = args.depends_on.as_deref().map(|ids| self.resolve_all(ids));
        let Some(step) = self.dag.find_step_mut(&id) else {
            return Err(ApplyError::UnknownStep(args.step_id.clone()));
        };

        if let Some(name) = &args.name {
            step.name = name.clone();
        }
        if let Some(instruction) = &args.instruction {
            step.instruction = instruction.clone();
        }
        if let Some(tools) = &args.tools {
            step.tools = dedup_tools(tools.clone());
        }
        if let Some(add) = &args.add_tools {
            step.add_tools(add);
        }
        if let Some(remove) = &args.remove_tools {
            step.remove_tools(remove);
        }
        if let Some(depends_on) = depends_on {
            step.depends_on = depends_on;
        }
        Ok(())
    }

    fn delete_step(&mut self, args: &DeleteStepArgs) -> Result<(), ApplyError> {
        let id = self.resolve_existing(&args.step_id)?;

        let replacement = match args.rewire_strategy {
            RewireStrategy::Auto => None,
            RewireStrategy::Manual => {
                let target = args
                    .rewire_to_step_id
                    .as_deref()
                    .ok_or_else(|| ApplyError::MissingRewireTarget(args.step_id.clone()))?;
                let target = self.resolve(target);
                if target == id {
                    return Err(ApplyError::SelfRewire(args.step_id.clone()));
                }
                Some(vec![target])
            }
        };

        let Some(idx) = self.dag.steps.iter().position(|s| s.id == id) else {
            return Err(ApplyError::UnknownStep(args.step_id.clone()));
        };
        let removed = self.dag.steps.remove(idx);
        let replacement = replacement.unwrap_or(removed.depends_on);

        for step in &mut self.dag.steps {
            let Some(pos) = step.depends_on.iter().position(|d| *d == id) else {
                continue;
            };
            let mut rewired: Vec<StepId> = step.depends_on[..pos].to_vec();
            rewired.extend(replacement.iter().cloned());
            rewired.extend(step.depends_on[pos + 1..].iter().cloned());
            rewired.retain(|d| *d != id && *d != step.id);
            step.depends_on = dedup_ids(rewired);
        }
        Ok(())
    }

    fn reorder_steps(&mut self, args: &ReorderStepsArgs) -> Result<(), ApplyError> {
        let id = self.resolve_existing(&args.step_id)?;
        let depends_on = self.resolve_all(&args.new_depends_on);
        if let Some(step) = self.dag.find_step_mut(&id) {
            step.depends_on = depends_on;
        }
        Ok(())
    }

    /// A dependency may name a temp id that was only minted later in the
    /// batch; rewrite those now that every temp id is known.
    fn resolve_forward_temp_ids(&mut self) {
        if self.temp_ids.is_empty() {
            return;
        }
        for step in &mut self.dag.steps {
            let resolved: Vec<StepId> = step
                .depends_on
                .iter()
                .map(|d| self.temp_ids.get(d).cloned().unwrap_or_else(|| d.clone()))
                .collect();
            step.depends_on = dedup_ids(resolved);
        }
    }
}
