use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StepGraphError};
use crate::value::value_as_string;

/// Step number, unique within a revision and assigned by the author.
pub type StepNo = u32;

pub type WorkflowId = i64;
pub type RevisionId = i64;

/// Key/value store used for step inputs and the run-scoped variable map.
pub type Values = serde_json::Map<String, serde_json::Value>;

/// A single node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_no: StepNo,
    /// Name of the registered step type (selects behavior and link mode).
    pub step_type_name: String,
    /// Serialized JSON object holding the step's input configuration.
    #[serde(default)]
    pub input_json: String,
    /// Human-readable summary of what the step does.
    #[serde(default)]
    pub summary: Option<String>,
}

impl Step {
    pub fn new(step_no: StepNo, step_type_name: impl Into<String>) -> Self {
        Self {
            step_no,
            step_type_name: step_type_name.into(),
            input_json: String::new(),
            summary: None,
        }
    }

    /// Set the input configuration from a JSON value.
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input_json = input.to_string();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Parse the serialized input configuration.
    ///
    /// A blank input means "no inputs". Anything other than a JSON object is
    /// rejected.
    pub fn input_values(&self) -> Result<Values> {
        if self.input_json.trim().is_empty() {
            return Ok(Values::new());
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&self.input_json).map_err(|e| {
                StepGraphError::InvalidStepInput {
                    step_no: self.step_no,
                    message: e.to_string(),
                }
            })?;

        match parsed {
            serde_json::Value::Object(map) => Ok(map),
            serde_json::Value::Null => Ok(Values::new()),
            other => Err(StepGraphError::InvalidStepInput {
                step_no: self.step_no,
                message: format!("expected a JSON object, got {}", other),
            }),
        }
    }
}

/// A directed, optionally condition-guarded edge between two steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from_step_no: StepNo,
    /// Destination step. `None` is a dangling link: the end of a path.
    #[serde(default)]
    pub to_step_no: Option<StepNo>,
    /// `None` means the link is always taken.
    #[serde(default)]
    pub condition_value: Option<String>,
}

impl Link {
    /// An unconditional link.
    pub fn always(from: StepNo, to: StepNo) -> Self {
        Self {
            from_step_no: from,
            to_step_no: Some(to),
            condition_value: None,
        }
    }

    /// A link taken when the origin step's output matches `condition`.
    pub fn when(from: StepNo, to: StepNo, condition: impl Into<String>) -> Self {
        Self {
            from_step_no: from,
            to_step_no: Some(to),
            condition_value: Some(condition.into()),
        }
    }

    /// An unconditional link that ends the path.
    pub fn dangling(from: StepNo) -> Self {
        Self {
            from_step_no: from,
            to_step_no: None,
            condition_value: None,
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.condition_value.is_none()
    }
}

/// A named workflow, pointing at exactly one current revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub workflow_type_name: String,
    #[serde(default)]
    pub current_revision_id: Option<RevisionId>,
}

/// Immutable, versioned snapshot of a workflow's steps and links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub workflow_id: WorkflowId,
    pub version_no: u32,
    #[serde(default)]
    pub start_step_no: Option<StepNo>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub api_name: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Revision {
    /// An unsaved revision, e.g. for test runs of an edited graph.
    pub fn draft(workflow_id: WorkflowId, start_step_no: StepNo) -> Self {
        Self {
            id: 0,
            workflow_id,
            version_no: 0,
            start_step_no: Some(start_step_no),
            steps: vec![],
            links: vec![],
            api_name: None,
            api_version: None,
            commit_message: None,
            created_at: None,
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_links(mut self, links: Vec<Link>) -> Self {
        self.links = links;
        self
    }
}

/// What a step produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Value matched against outbound link conditions.
    pub value: serde_json::Value,
    pub message: Option<String>,
    /// Stop the whole workflow after this step.
    #[serde(default)]
    pub halt: bool,
}

impl StepOutput {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self {
            value: value.into(),
            message: None,
            halt: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn halting(mut self) -> Self {
        self.halt = true;
        self
    }
}

/// One executed step (or one fork branch) in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogStep {
    pub seq_no: u32,
    pub step_no: StepNo,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub output_data: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RunLogStep {
    pub fn new(seq_no: u32, step_no: StepNo, started_at: DateTime<Utc>, output: &StepOutput) -> Self {
        Self {
            seq_no,
            step_no,
            started_at,
            ended_at: Utc::now(),
            output_data: value_as_string(&output.value),
            message: output.message.clone(),
        }
    }
}

/// Append-only audit trail of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub workflow_id: WorkflowId,
    #[serde(default)]
    pub revision_id: Option<RevisionId>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub had_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub steps: Vec<RunLogStep>,
}

impl RunLog {
    pub fn start(workflow_id: WorkflowId) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            workflow_id,
            revision_id: None,
            started_at: Utc::now(),
            ended_at: None,
            had_error: false,
            error_message: None,
            steps: vec![],
        }
    }

    /// Step numbers in the order their entries were appended.
    pub fn visited_step_nos(&self) -> Vec<StepNo> {
        self.steps.iter().map(|s| s.step_no).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_input_values() {
        let step = Step::new(1, "increment").with_input(json!({"key": "sum", "by": 2}));
        let values = step.input_values().unwrap();
        assert_eq!(values.get("by"), Some(&json!(2)));
    }

    #[test]
    fn test_step_blank_input_is_empty() {
        let step = Step::new(1, "container");
        assert!(step.input_values().unwrap().is_empty());
    }

    #[test]
    fn test_step_non_object_input_rejected() {
        let mut step = Step::new(4, "increment");
        step.input_json = "[1, 2]".into();
        let err = step.input_values().unwrap_err();
        assert!(matches!(err, StepGraphError::InvalidStepInput { step_no: 4, .. }));
    }

    #[test]
    fn test_link_builders() {
        let l = Link::always(1, 2);
        assert!(l.is_unconditional());
        assert_eq!(l.to_step_no, Some(2));

        let l = Link::when(3, 4, "true");
        assert_eq!(l.condition_value.as_deref(), Some("true"));

        let l = Link::dangling(5);
        assert_eq!(l.to_step_no, None);
    }

    #[test]
    fn test_run_log_step_serializes_output() {
        let output = StepOutput::new(json!(11)).with_message("Added");
        let entry = RunLogStep::new(1, 3, Utc::now(), &output);
        assert_eq!(entry.output_data.as_deref(), Some("11"));
        assert_eq!(entry.message.as_deref(), Some("Added"));

        let entry = RunLogStep::new(2, 3, Utc::now(), &StepOutput::empty());
        assert_eq!(entry.output_data, None);
    }
}
