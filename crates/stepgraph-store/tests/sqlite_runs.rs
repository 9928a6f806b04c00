use std::sync::Arc;

use serde_json::json;

use stepgraph_core::error::StepGraphError;
use stepgraph_core::registry::WorkflowType;
use stepgraph_core::traits::WorkflowTypeBehavior;
use stepgraph_core::types::{Link, Revision, Step};
use stepgraph_engine::{builtin_registry, RunInput, WorkflowExecutor, DEFAULT_WORKFLOW_TYPE};
use stepgraph_store::{NewRevision, SqliteStore};

fn counting_revision() -> NewRevision {
    NewRevision {
        start_step_no: Some(1),
        steps: vec![
            Step::new(1, "increment").with_input(json!({"key": "n"})),
            Step::new(2, "condition").with_input(json!({"key": "n", "equals": 3})),
            Step::new(3, "end"),
        ],
        links: vec![
            Link::always(1, 2),
            Link::when(2, 3, "true"),
            Link::when(2, 1, "false"),
        ],
        commit_message: Some("count to three".into()),
        ..NewRevision::default()
    }
}

fn executor(store: &Arc<SqliteStore>) -> WorkflowExecutor {
    WorkflowExecutor::new(Arc::new(builtin_registry()), store.clone())
        .with_run_log_sink(store.clone())
        .with_transactions(store.clone())
}

#[tokio::test]
async fn test_run_stored_workflow_and_read_back_log() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let workflow = store.create_workflow("counter", DEFAULT_WORKFLOW_TYPE).unwrap();
    store.store_revision(workflow.id, counting_revision()).unwrap();

    let output = executor(&store).run(RunInput::new(workflow.id)).await.unwrap();

    assert!(output.succeeded(), "{:?}", output.error);
    assert_eq!(output.context.get("n"), Some(&json!(3)));
    assert_eq!(
        output.run_log.visited_step_nos(),
        vec![1, 2, 1, 2, 1, 2, 3]
    );

    let runs = store.list_runs(workflow.id, 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, output.run_log.run_id);
    assert_eq!(runs[0].step_count, 7);
    assert!(runs[0].ended_at.is_some());

    let steps = store.load_run_steps(&runs[0].run_id).unwrap();
    let outputs: Vec<Option<&str>> = steps.iter().map(|s| s.output_data.as_deref()).collect();
    assert_eq!(
        outputs,
        vec![
            Some("1"),
            Some("false"),
            Some("2"),
            Some("false"),
            Some("3"),
            Some("true"),
            None
        ]
    );
}

#[tokio::test]
async fn test_failed_run_is_recorded_and_store_stays_usable() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let workflow = store.create_workflow("counter", DEFAULT_WORKFLOW_TYPE).unwrap();
    store.store_revision(workflow.id, counting_revision()).unwrap();

    let output = executor(&store)
        .run(RunInput::new(workflow.id).with_value("n", "not a number"))
        .await
        .unwrap();

    assert!(!output.succeeded());
    let runs = store.list_runs(workflow.id, 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].had_error);
    assert!(runs[0]
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("n is not an integer")));

    // The run's transaction was rolled back and closed.
    let output = executor(&store)
        .run(RunInput::new(workflow.id).with_value("n", 2))
        .await
        .unwrap();
    assert!(output.succeeded());
    assert_eq!(store.list_runs(workflow.id, 10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_step_type_recorded_as_configuration_failure() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let workflow = store.create_workflow("broken", DEFAULT_WORKFLOW_TYPE).unwrap();
    store
        .store_revision(
            workflow.id,
            NewRevision {
                start_step_no: Some(1),
                steps: vec![Step::new(1, "teleport")],
                ..NewRevision::default()
            },
        )
        .unwrap();

    let err = executor(&store)
        .run(RunInput::new(workflow.id))
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    let runs = store.list_runs(workflow.id, 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].had_error);
    assert_eq!(runs[0].revision_id, None);
}

/// Requires every revision to contain an `end` step.
struct MustEnd;

impl WorkflowTypeBehavior for MustEnd {
    fn validate(&self, revision: &Revision) -> Vec<String> {
        if revision.steps.iter().any(|s| s.step_type_name == "end") {
            vec![]
        } else {
            vec!["Workflow must contain an end step".to_string()]
        }
    }
}

fn validating_store() -> SqliteStore {
    let mut registry = builtin_registry();
    registry.register_workflow_type(WorkflowType::new("must_end", MustEnd));
    SqliteStore::in_memory()
        .unwrap()
        .with_registry(Arc::new(registry))
}

#[test]
fn test_stored_revision_gets_generated_summaries() {
    let store = validating_store();
    let workflow = store.create_workflow("counter", DEFAULT_WORKFLOW_TYPE).unwrap();

    let mut revision = counting_revision();
    revision.steps[2].summary = Some("finished".into());
    let stored = store.store_revision(workflow.id, revision).unwrap();

    let loaded = store.load_revision(stored.id).unwrap();
    let summaries: Vec<Option<&str>> = loaded.steps.iter().map(|s| s.summary.as_deref()).collect();
    assert_eq!(
        summaries,
        vec![Some("Add 1 to n"), Some("Is n equal to 3?"), Some("finished")]
    );
    assert_eq!(loaded.steps, stored.steps);
}

#[test]
fn test_invalid_revision_is_rejected() {
    let store = validating_store();
    let workflow = store.create_workflow("broken", DEFAULT_WORKFLOW_TYPE).unwrap();

    let mut revision = counting_revision();
    revision.steps.push(Step::new(4, "teleport"));
    revision.links.push(Link::always(3, 9));

    let err = store.store_revision(workflow.id, revision).unwrap_err();
    let StepGraphError::Validation(errors) = &err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(errors.iter().any(|e| e == "Step 4: Unknown workflow step type teleport"));
    assert!(errors.iter().any(|e| e.contains("points to step 9")));

    // Nothing from the rejected revision was written.
    assert_eq!(store.find_workflow(workflow.id).unwrap().current_revision_id, None);
    let stored = store.store_revision(workflow.id, counting_revision()).unwrap();
    assert_eq!(stored.version_no, 1);
}

#[test]
fn test_workflow_type_validator_rejects_revision() {
    let store = validating_store();
    let workflow = store.create_workflow("strict", "must_end").unwrap();

    let mut revision = counting_revision();
    revision.steps.truncate(2);
    revision.links.retain(|l| l.to_step_no != Some(3));

    let err = store.store_revision(workflow.id, revision).unwrap_err();
    assert!(
        matches!(&err, StepGraphError::Validation(errors) if errors == &vec!["Workflow must contain an end step".to_string()]),
        "{err:?}"
    );

    assert!(store.store_revision(workflow.id, counting_revision()).is_ok());
}
