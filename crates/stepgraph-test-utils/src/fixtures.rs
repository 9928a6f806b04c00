//! Test step types, a test workflow type, and graph builders.

use futures::future::BoxFuture;
use serde_json::{json, Value};

use stepgraph_core::context::ExecutionContext;
use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::registry::{OutboundLinkMode, Registry, StepType, WorkflowType};
use stepgraph_core::traits::{ForkDecision, ForkingBehavior, StepBehavior, WorkflowTypeBehavior};
use stepgraph_core::types::*;
use stepgraph_core::value::{is_truthy, value_as_i64};

pub const TEST_WORKFLOW_TYPE: &str = "test_workflow_type";
pub const ADD_X_TO_SUM: &str = "add_x_to_sum";
pub const BOOLEAN_CONDITIONAL: &str = "boolean_conditional";
pub const CONTAINER: &str = "container";
pub const SPLIT_BY_LETTERS: &str = "split_by_letters_in_name";
pub const HALT: &str = "halt";
pub const FAIL: &str = "fail";

/// Registry holding the test step types and the test workflow type.
pub fn test_registry() -> Registry {
    let mut r = Registry::new();
    r.register_workflow_type(
        WorkflowType::new(TEST_WORKFLOW_TYPE, TestWorkflowType)
            .with_label("Test Workflow Type")
            .with_description("Seeds `sum` and exposes every hook through context values"),
    );
    r.register_step_type(
        StepType::new(ADD_X_TO_SUM, OutboundLinkMode::One)
            .with_label("Add X to Sum")
            .with_description("Add int in `x` to int in `sum`")
            .with_behavior(AddToSum),
    );
    r.register_step_type(
        StepType::new(BOOLEAN_CONDITIONAL, OutboundLinkMode::Two)
            .with_label("Boolean Conditional")
            .with_link_option("true", "Then")
            .with_link_option("false", "Else")
            .with_behavior(BooleanCondition),
    );
    r.register_step_type(StepType::container(CONTAINER).with_label("Container"));
    r.register_step_type(
        StepType::new(SPLIT_BY_LETTERS, OutboundLinkMode::Variable)
            .with_label("Split by letters in name")
            .with_forking(SplitByLetters),
    );
    r.register_step_type(StepType::new(HALT, OutboundLinkMode::One).with_behavior(HaltStep));
    r.register_step_type(StepType::new(FAIL, OutboundLinkMode::One).with_behavior(FailStep));
    r
}

// ── Builders ────────────────────────────────────────────────────

/// An `add_x_to_sum` step.
pub fn add(step_no: StepNo, x: i64) -> Step {
    Step::new(step_no, ADD_X_TO_SUM).with_input(json!({ "x": x }))
}

pub fn container(step_no: StepNo) -> Step {
    Step::new(step_no, CONTAINER)
}

pub fn split(step_no: StepNo) -> Step {
    Step::new(step_no, SPLIT_BY_LETTERS)
}

pub fn revision(start: StepNo, steps: Vec<Step>, links: Vec<Link>) -> Revision {
    Revision::draft(0, start).with_steps(steps).with_links(links)
}

/// ```text
/// 1 (+1) -> 2 (+2) -> 3 condition -> true:  4 (+3) -> 6 (+5)
///                                  -> false: 5 (+4) -> 6
/// ```
pub fn branching_revision() -> Revision {
    revision(
        1,
        vec![
            add(1, 1),
            add(2, 2),
            Step::new(3, BOOLEAN_CONDITIONAL),
            add(4, 3),
            add(5, 4),
            add(6, 5),
        ],
        vec![
            Link::always(1, 2),
            Link::always(2, 3),
            Link::when(3, 4, "true"),
            Link::when(3, 5, "false"),
            Link::always(4, 6),
            Link::always(5, 6),
        ],
    )
}

/// Values map from a JSON object literal.
pub fn values(value: Value) -> Values {
    match value {
        Value::Object(map) => map,
        _ => Values::new(),
    }
}

// ── TestWorkflowType ────────────────────────────────────────────

/// Workflow type whose hooks are driven by context values:
/// `seedValue` seeds `sum` in `pre_run`, `overrideSumInPostRun` replaces it
/// in `post_run`, `doubleSumInEveryPreStep` doubles it before every step,
/// `overrideReturnValueInPostStep` replaces every step's output, and
/// `errorMessageOverride` replaces the recorded error message.
pub struct TestWorkflowType;

impl WorkflowTypeBehavior for TestWorkflowType {
    fn pre_run<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let seed = match ctx.get("seedValue") {
                None => json!(0),
                Some(v) => value_as_i64(v).map(Value::from).unwrap_or(Value::Null),
            };
            ctx.set("seedValue", seed.clone());
            ctx.set("sum", seed);
            Ok(())
        })
    }

    fn post_run<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(sum) = ctx.get("overrideSumInPostRun").and_then(value_as_i64) {
                ctx.set("sum", sum);
            }
            Ok(())
        })
    }

    fn on_error<'a>(
        &'a self,
        error: &'a StepGraphError,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            ctx.set("handledError", error.to_string());
            ctx.get_str("errorMessageOverride").map(str::to_string)
        })
    }

    fn pre_step<'a>(
        &'a self,
        _step: &'a Step,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ctx.get("doubleSumInEveryPreStep").is_some() {
                if let Some(sum) = ctx.get("sum").map_or(Some(0), value_as_i64) {
                    ctx.set("sum", sum * 2);
                }
            }
            Ok(())
        })
    }

    fn post_step<'a>(
        &'a self,
        _step: &'a Step,
        ctx: &'a mut ExecutionContext,
        output: StepOutput,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            match ctx.get("overrideReturnValueInPostStep") {
                Some(value) => Ok(StepOutput {
                    value: value.clone(),
                    ..output
                }),
                None => Ok(output),
            }
        })
    }
}

// ── AddToSum ────────────────────────────────────────────────────

/// Adds input `x` to context `sum`; fails when `sum` is not an integer.
pub struct AddToSum;

impl StepBehavior for AddToSum {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let sum = match ctx.get("sum") {
                None => 0,
                Some(v) => value_as_i64(v).ok_or_else(|| {
                    StepGraphError::step_failed(step.step_no, "sum is not an integer")
                })?,
            };
            let x = input.get("x").and_then(value_as_i64).unwrap_or(0);
            let new_sum = sum + x;
            ctx.set("sum", new_sum);
            Ok(StepOutput::new(new_sum)
                .with_message(format!("Added {} and {} to make {}", sum, x, new_sum)))
        })
    }
}

// ── BooleanCondition ────────────────────────────────────────────

/// Outputs the truthiness of context `condition`.
pub struct BooleanCondition;

impl StepBehavior for BooleanCondition {
    fn execute<'a>(
        &'a self,
        _step: &'a Step,
        _input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let condition = ctx.get("condition").is_some_and(is_truthy);
            Ok(StepOutput::new(condition))
        })
    }
}

// ── SplitByLetters ──────────────────────────────────────────────

/// Runs each branch whose condition value occurs in context `name`.
pub struct SplitByLetters;

impl ForkingBehavior for SplitByLetters {
    fn include_fork<'a>(
        &'a self,
        _step: &'a Step,
        fork: &'a Link,
        _input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<ForkDecision>> {
        Box::pin(async move {
            let letters = fork.condition_value.as_deref().unwrap_or("");
            let name = ctx.get_str("name").unwrap_or("");
            if name.contains(letters) {
                Ok(ForkDecision::run(format!("name [{}] contains [{}]", name, letters)))
            } else {
                Ok(ForkDecision::skip(format!(
                    "name [{}] does not contain [{}]",
                    name, letters
                )))
            }
        })
    }

    fn make_output<'a>(
        &'a self,
        _step: &'a Step,
        _input: &'a Values,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async { Ok(StepOutput::new(1).with_message("Output")) })
    }
}

// ── HaltStep / FailStep ─────────────────────────────────────────

pub struct HaltStep;

impl StepBehavior for HaltStep {
    fn execute<'a>(
        &'a self,
        _step: &'a Step,
        _input: &'a Values,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async { Ok(StepOutput::empty().with_message("Stopping").halting()) })
    }
}

pub struct FailStep;

impl StepBehavior for FailStep {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        _input: &'a Values,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move { Err(StepGraphError::step_failed(step.step_no, "boom")) })
    }
}
