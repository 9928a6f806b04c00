//! TOML workflow definition files.
//!
//! ```toml
//! name = "count to three"
//! workflow_type = "default"
//! start_step_no = 1
//!
//! [[steps]]
//! step_no = 1
//! type = "increment"
//! input = { key = "n" }
//!
//! [[links]]
//! from = 1
//! to = 2
//! condition = "true"   # omit for an unconditional link, omit `to` to end the path
//! ```

use std::path::Path;

use serde::Deserialize;

use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::types::{Link, Revision, Step, StepNo, WorkflowId};
use stepgraph_engine::DEFAULT_WORKFLOW_TYPE;
use stepgraph_store::NewRevision;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default = "default_workflow_type")]
    pub workflow_type: String,
    pub start_step_no: Option<StepNo>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub api_name: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub links: Vec<LinkDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDefinition {
    pub step_no: StepNo,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkDefinition {
    pub from: StepNo,
    #[serde(default)]
    pub to: Option<StepNo>,
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_workflow_type() -> String {
    DEFAULT_WORKFLOW_TYPE.to_string()
}

impl WorkflowDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StepGraphError::Config(e.to_string()))
    }

    /// An unsaved revision of this definition, for validation and test
    /// runs.
    pub fn to_revision(&self, workflow_id: WorkflowId) -> Revision {
        let new = self.to_new_revision();
        let mut revision = Revision::draft(workflow_id, 0)
            .with_steps(new.steps)
            .with_links(new.links);
        revision.start_step_no = new.start_step_no;
        revision.commit_message = new.commit_message;
        revision.api_name = new.api_name;
        revision.api_version = new.api_version;
        revision
    }

    pub fn to_new_revision(&self) -> NewRevision {
        let steps = self
            .steps
            .iter()
            .map(|s| {
                let mut step = Step::new(s.step_no, s.step_type.clone());
                if let Some(input) = &s.input {
                    step = step.with_input(input.clone());
                }
                step.summary = s.summary.clone();
                step
            })
            .collect();

        let links = self
            .links
            .iter()
            .map(|l| Link {
                from_step_no: l.from,
                to_step_no: l.to,
                condition_value: l.condition.clone(),
            })
            .collect();

        NewRevision {
            start_step_no: self.start_step_no,
            steps,
            links,
            api_name: self.api_name.clone(),
            api_version: self.api_version.clone(),
            commit_message: self.commit_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepgraph_engine::builtin_registry;

    const COUNTER: &str = r#"
name = "count to three"
start_step_no = 1
commit_message = "initial"

[[steps]]
step_no = 1
type = "increment"
input = { key = "n" }

[[steps]]
step_no = 2
type = "condition"
summary = "n reached 3?"
input = { key = "n", equals = 3 }

[[steps]]
step_no = 3
type = "end"

[[links]]
from = 1
to = 2

[[links]]
from = 2
to = 3
condition = "true"

[[links]]
from = 2
to = 1
condition = "false"
"#;

    #[test]
    fn test_parse_definition() {
        let def = WorkflowDefinition::parse(COUNTER).unwrap();
        assert_eq!(def.name, "count to three");
        assert_eq!(def.workflow_type, DEFAULT_WORKFLOW_TYPE);

        let revision = def.to_revision(0);
        assert_eq!(revision.start_step_no, Some(1));
        assert_eq!(revision.steps.len(), 3);
        assert_eq!(revision.steps[1].summary.as_deref(), Some("n reached 3?"));
        assert_eq!(
            revision.steps[1].input_values().unwrap().get("equals"),
            Some(&json!(3))
        );
        assert!(revision.steps[2].input_values().unwrap().is_empty());
        assert_eq!(revision.links[0], Link::always(1, 2));
        assert_eq!(revision.links[2], Link::when(2, 1, "false"));
        assert_eq!(revision.commit_message.as_deref(), Some("initial"));

        assert!(builtin_registry()
            .validate_revision(&def.workflow_type, &revision)
            .is_empty());
    }

    #[test]
    fn test_dangling_link_and_missing_fields() {
        let def = WorkflowDefinition::parse(
            "name = \"x\"\nstart_step_no = 1\n[[steps]]\nstep_no = 1\ntype = \"end\"\n[[links]]\nfrom = 1\n",
        )
        .unwrap();
        assert_eq!(def.to_new_revision().links[0], Link::dangling(1));

        let err = WorkflowDefinition::parse("start_step_no = 1").unwrap_err();
        assert!(matches!(err, StepGraphError::Config(_)));
    }
}
