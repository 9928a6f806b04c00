//! Name → behavior lookup for step types and workflow types.
//!
//! The registry is populated once at startup and shared read-only
//! (`Arc<Registry>`) by every run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StepGraphError};
use crate::traits::{ForkingBehavior, StepBehavior, WorkflowTypeBehavior};
use crate::types::{Revision, Step};

/// How the resolver interprets a step type's outbound links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundLinkMode {
    /// Never advances. The stored link only positions the step in the graph.
    Zero,
    /// Exactly one unconditional successor.
    One,
    /// Condition-guarded successors (if/else, switch).
    Two,
    /// A selected subset of successors, run as forks that reconverge.
    Variable,
    /// Groups a nested sequence through synthesized `push`/`pop` links.
    Container,
}

impl std::fmt::Display for OutboundLinkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Zero => "zero",
            Self::One => "one",
            Self::Two => "two",
            Self::Variable => "variable",
            Self::Container => "container",
        };
        write!(f, "{}", s)
    }
}

/// A labelled condition value a step type offers to authors,
/// e.g. `true` → "Then".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundLinkOption {
    pub value: String,
    pub label: String,
}

/// The executable part of a step type.
#[derive(Clone)]
pub enum StepExecutor {
    Simple(Arc<dyn StepBehavior>),
    Forking(Arc<dyn ForkingBehavior>),
}

/// Definition of a step type.
#[derive(Clone)]
pub struct StepType {
    pub name: String,
    pub label: String,
    pub description: Option<String>,
    pub outbound_link_mode: OutboundLinkMode,
    pub outbound_link_options: Vec<OutboundLinkOption>,
    /// `None` only for container types, which have nothing to execute.
    pub executor: Option<StepExecutor>,
}

impl StepType {
    pub fn new(name: impl Into<String>, outbound_link_mode: OutboundLinkMode) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            description: None,
            outbound_link_mode,
            outbound_link_options: vec![],
            executor: None,
        }
    }

    /// A container step type (no behavior).
    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, OutboundLinkMode::Container)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_link_option(mut self, value: impl Into<String>, label: impl Into<String>) -> Self {
        self.outbound_link_options.push(OutboundLinkOption {
            value: value.into(),
            label: label.into(),
        });
        self
    }

    pub fn with_behavior(mut self, behavior: impl StepBehavior) -> Self {
        self.executor = Some(StepExecutor::Simple(Arc::new(behavior)));
        self
    }

    pub fn with_forking(mut self, behavior: impl ForkingBehavior) -> Self {
        self.executor = Some(StepExecutor::Forking(Arc::new(behavior)));
        self
    }
}

impl std::fmt::Debug for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let executor = match &self.executor {
            Some(StepExecutor::Simple(_)) => "simple",
            Some(StepExecutor::Forking(_)) => "forking",
            None => "none",
        };
        f.debug_struct("StepType")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("outbound_link_mode", &self.outbound_link_mode)
            .field("executor", &executor)
            .finish()
    }
}

/// Definition of a workflow type.
#[derive(Clone)]
pub struct WorkflowType {
    pub name: String,
    pub label: String,
    pub description: Option<String>,
    pub behavior: Arc<dyn WorkflowTypeBehavior>,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>, behavior: impl WorkflowTypeBehavior) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            description: None,
            behavior: Arc::new(behavior),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Registry of step types and workflow types.
#[derive(Default)]
pub struct Registry {
    step_types: HashMap<String, StepType>,
    workflow_types: HashMap<String, WorkflowType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step type, replacing any previous one with the same name.
    pub fn register_step_type(&mut self, step_type: StepType) {
        if self.step_types.contains_key(&step_type.name) {
            warn!(name = %step_type.name, "Replacing existing workflow step type");
        }
        self.step_types.insert(step_type.name.clone(), step_type);
    }

    /// Register a workflow type, replacing any previous one with the same name.
    pub fn register_workflow_type(&mut self, workflow_type: WorkflowType) {
        if self.workflow_types.contains_key(&workflow_type.name) {
            info!(name = %workflow_type.name, "Replacing existing workflow type");
        }
        self.workflow_types
            .insert(workflow_type.name.clone(), workflow_type);
    }

    pub fn find_step_type(&self, name: &str) -> Option<&StepType> {
        self.step_types.get(name)
    }

    pub fn step_type(&self, name: &str) -> Result<&StepType> {
        self.step_types
            .get(name)
            .ok_or_else(|| StepGraphError::UnknownStepType(name.to_string()))
    }

    pub fn workflow_type(&self, name: &str) -> Result<&WorkflowType> {
        self.workflow_types
            .get(name)
            .ok_or_else(|| StepGraphError::UnknownWorkflowType(name.to_string()))
    }

    pub fn link_mode(&self, step_type_name: &str) -> Result<OutboundLinkMode> {
        self.step_type(step_type_name).map(|t| t.outbound_link_mode)
    }

    /// All step types, sorted by name.
    pub fn step_types(&self) -> Vec<&StepType> {
        let mut types: Vec<_> = self.step_types.values().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    /// All workflow types, sorted by name.
    pub fn workflow_types(&self) -> Vec<&WorkflowType> {
        let mut types: Vec<_> = self.workflow_types.values().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    /// Summary a step's type generates for it from its input, if any.
    pub fn dynamic_summary(&self, step: &Step) -> Option<String> {
        let step_type = self.find_step_type(&step.step_type_name)?;
        let Some(StepExecutor::Simple(behavior)) = &step_type.executor else {
            return None;
        };
        let input = step.input_values().ok()?;
        behavior.dynamic_summary(step, &input)
    }

    /// Check a revision against the registered step types and the workflow
    /// type it will be stored under.
    ///
    /// Collects every problem instead of stopping at the first: unknown step
    /// types, unreadable inputs, validator complaints (prefixed with the
    /// step number), duplicate step numbers or link conditions, links or a
    /// start step that reference missing steps, and whatever the workflow
    /// type's own validator rejects.
    pub fn validate_revision(&self, workflow_type_name: &str, revision: &Revision) -> Vec<String> {
        let mut errors = Vec::new();
        let mut step_nos = HashSet::new();

        for step in &revision.steps {
            if !step_nos.insert(step.step_no) {
                errors.push(format!("Duplicate step number {}", step.step_no));
            }

            let step_type = match self.find_step_type(&step.step_type_name) {
                Some(t) => t,
                None => {
                    errors.push(format!(
                        "Step {}: Unknown workflow step type {}",
                        step.step_no, step.step_type_name
                    ));
                    continue;
                }
            };

            let input = match step.input_values() {
                Ok(input) => input,
                Err(e) => {
                    errors.push(format!("Step {}: {}", step.step_no, e));
                    continue;
                }
            };

            match &step_type.executor {
                Some(StepExecutor::Simple(behavior)) => {
                    errors.extend(
                        behavior
                            .validate(step, &input)
                            .into_iter()
                            .map(|e| format!("Step {}: {}", step.step_no, e)),
                    );
                }
                Some(StepExecutor::Forking(_)) => {}
                None if step_type.outbound_link_mode != OutboundLinkMode::Container => {
                    errors.push(format!(
                        "Step {}: step type {} has no executor",
                        step.step_no, step.step_type_name
                    ));
                }
                None => {}
            }
        }

        match revision.start_step_no {
            Some(start) if !step_nos.contains(&start) => {
                errors.push(format!("Start step {} does not exist", start));
            }
            None if !revision.steps.is_empty() => {
                errors.push("Revision has steps but no start step".to_string());
            }
            _ => {}
        }

        let mut link_keys = HashSet::new();
        for link in &revision.links {
            if !step_nos.contains(&link.from_step_no) {
                errors.push(format!(
                    "Link from step {} starts at a step that does not exist",
                    link.from_step_no
                ));
            }
            if let Some(to) = link.to_step_no {
                if !step_nos.contains(&to) {
                    errors.push(format!(
                        "Link from step {} points to step {} which does not exist",
                        link.from_step_no, to
                    ));
                }
            }
            if !link_keys.insert((link.from_step_no, link.condition_value.clone())) {
                errors.push(format!(
                    "Step {} has more than one link with condition {:?}",
                    link.from_step_no, link.condition_value
                ));
            }
        }

        match self.workflow_types.get(workflow_type_name) {
            Some(workflow_type) => errors.extend(workflow_type.behavior.validate(revision)),
            None => errors.push(format!("Unknown workflow type {}", workflow_type_name)),
        }

        errors
    }
}
