//! Step types and the workflow type every registry starts with.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use stepgraph_core::context::ExecutionContext;
use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::registry::{OutboundLinkMode, Registry, StepType, WorkflowType};
use stepgraph_core::traits::{ForkDecision, ForkingBehavior, StepBehavior, WorkflowTypeBehavior};
use stepgraph_core::types::{Link, Step, StepOutput, Values};
use stepgraph_core::value::{condition_matches, is_truthy, value_as_i64};

pub const DEFAULT_WORKFLOW_TYPE: &str = "default";

/// Register the built-in step types and the `default` workflow type.
pub fn register_builtins(registry: &mut Registry) {
    registry.register_step_type(
        StepType::new("set_values", OutboundLinkMode::One)
            .with_label("Set values")
            .with_description("Copy every input value into the run's variables")
            .with_behavior(SetValues),
    );
    registry.register_step_type(
        StepType::new("increment", OutboundLinkMode::One)
            .with_label("Increment")
            .with_description("Add `by` (default 1) to the integer variable named by `key`")
            .with_behavior(Increment),
    );
    registry.register_step_type(
        StepType::new("condition", OutboundLinkMode::Two)
            .with_label("Condition")
            .with_description(
                "Branch on the variable named by `key`: its truthiness, or equality with `equals`",
            )
            .with_link_option("true", "Then")
            .with_link_option("false", "Else")
            .with_behavior(Condition),
    );
    registry.register_step_type(
        StepType::new("switch", OutboundLinkMode::Two)
            .with_label("Switch")
            .with_description("Branch on the value of the variable named by `key`")
            .with_behavior(Switch),
    );
    registry.register_step_type(
        StepType::container("container")
            .with_label("Container")
            .with_description("Group steps"),
    );
    registry.register_step_type(
        StepType::new("end", OutboundLinkMode::Zero)
            .with_label("End")
            .with_description("End the workflow")
            .with_behavior(End),
    );
    registry.register_step_type(
        StepType::new("halt", OutboundLinkMode::One)
            .with_label("Halt")
            .with_description("Stop the whole workflow, including any enclosing forks")
            .with_behavior(Halt),
    );
    registry.register_step_type(
        StepType::new("fork", OutboundLinkMode::Variable)
            .with_label("Fork")
            .with_description(
                "Run each branch whose condition matches the variable named by `key` \
                 (or one of its elements); branches without a condition always run",
            )
            .with_forking(Fork),
    );
    registry.register_workflow_type(
        WorkflowType::new(DEFAULT_WORKFLOW_TYPE, DefaultWorkflowType)
            .with_label("Default")
            .with_description("No hooks"),
    );
}

/// A registry holding only the built-ins.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    register_builtins(&mut registry);
    registry
}

fn parse_input<T: DeserializeOwned>(step: &Step, input: &Values) -> Result<T> {
    serde_json::from_value(Value::Object(input.clone())).map_err(|e| {
        StepGraphError::InvalidStepInput {
            step_no: step.step_no,
            message: e.to_string(),
        }
    })
}

fn input_problems<T: DeserializeOwned>(input: &Values) -> Vec<String> {
    match serde_json::from_value::<T>(Value::Object(input.clone())) {
        Ok(_) => vec![],
        Err(e) => vec![e.to_string()],
    }
}

// ── DefaultWorkflowType ─────────────────────────────────────────

pub struct DefaultWorkflowType;

impl WorkflowTypeBehavior for DefaultWorkflowType {}

// ── SetValues ───────────────────────────────────────────────────

pub struct SetValues;

impl StepBehavior for SetValues {
    fn execute<'a>(
        &'a self,
        _step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            for (key, value) in input {
                ctx.set(key.clone(), value.clone());
            }
            Ok(StepOutput::empty().with_message(format!("Set {} values", input.len())))
        })
    }

    fn validate(&self, _step: &Step, input: &Values) -> Vec<String> {
        if input.is_empty() {
            vec!["No values to set".to_string()]
        } else {
            vec![]
        }
    }
}

// ── Increment ───────────────────────────────────────────────────

pub struct Increment;

#[derive(Deserialize)]
struct IncrementInput {
    key: String,
    #[serde(default = "default_increment")]
    by: i64,
}

fn default_increment() -> i64 {
    1
}

impl StepBehavior for Increment {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let p: IncrementInput = parse_input(step, input)?;
            let current = match ctx.get(&p.key) {
                None => 0,
                Some(v) => value_as_i64(v).ok_or_else(|| {
                    StepGraphError::step_failed(
                        step.step_no,
                        format!("{} is not an integer: {}", p.key, v),
                    )
                })?,
            };
            let updated = current.checked_add(p.by).ok_or_else(|| {
                StepGraphError::step_failed(step.step_no, format!("{} overflowed", p.key))
            })?;
            ctx.set(p.key.clone(), updated);
            Ok(StepOutput::new(updated).with_message(format!(
                "Added {} to {} to make {}",
                p.by, current, updated
            )))
        })
    }

    fn validate(&self, _step: &Step, input: &Values) -> Vec<String> {
        input_problems::<IncrementInput>(input)
    }

    fn dynamic_summary(&self, step: &Step, input: &Values) -> Option<String> {
        let p: IncrementInput = parse_input(step, input).ok()?;
        Some(format!("Add {} to {}", p.by, p.key))
    }
}

// ── Condition ───────────────────────────────────────────────────

pub struct Condition;

#[derive(Deserialize)]
struct ConditionInput {
    key: String,
    #[serde(default)]
    equals: Option<Value>,
}

impl StepBehavior for Condition {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let p: ConditionInput = parse_input(step, input)?;
            let value = ctx.get(&p.key).cloned().unwrap_or(Value::Null);
            let result = match &p.equals {
                Some(expected) => &value == expected,
                None => is_truthy(&value),
            };
            Ok(StepOutput::new(result))
        })
    }

    fn validate(&self, _step: &Step, input: &Values) -> Vec<String> {
        input_problems::<ConditionInput>(input)
    }

    fn dynamic_summary(&self, step: &Step, input: &Values) -> Option<String> {
        let p: ConditionInput = parse_input(step, input).ok()?;
        Some(match p.equals {
            Some(expected) => format!("Is {} equal to {}?", p.key, expected),
            None => format!("Is {} set?", p.key),
        })
    }
}

// ── Switch ──────────────────────────────────────────────────────

pub struct Switch;

#[derive(Deserialize)]
struct SwitchInput {
    key: String,
}

impl StepBehavior for Switch {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let p: SwitchInput = parse_input(step, input)?;
            let value = ctx.get(&p.key).cloned().unwrap_or(Value::Null);
            Ok(StepOutput::new(value))
        })
    }

    fn validate(&self, _step: &Step, input: &Values) -> Vec<String> {
        input_problems::<SwitchInput>(input)
    }
}

// ── End ─────────────────────────────────────────────────────────

pub struct End;

impl StepBehavior for End {
    fn execute<'a>(
        &'a self,
        _step: &'a Step,
        _input: &'a Values,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async { Ok(StepOutput::empty().with_message("End")) })
    }
}

// ── Halt ────────────────────────────────────────────────────────

pub struct Halt;

#[derive(Deserialize)]
struct HaltInput {
    #[serde(default)]
    message: Option<String>,
}

impl StepBehavior for Halt {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let p: HaltInput = parse_input(step, input)?;
            let message = p.message.unwrap_or_else(|| "Halted".to_string());
            Ok(StepOutput::empty().with_message(message).halting())
        })
    }

    fn validate(&self, _step: &Step, input: &Values) -> Vec<String> {
        input_problems::<HaltInput>(input)
    }
}

// ── Fork ────────────────────────────────────────────────────────

pub struct Fork;

#[derive(Deserialize)]
struct ForkInput {
    key: String,
}

fn selects(selector: &Value, condition: &str) -> bool {
    match selector {
        Value::Array(items) => items.iter().any(|item| condition_matches(condition, item)),
        other => condition_matches(condition, other),
    }
}

impl ForkingBehavior for Fork {
    fn include_fork<'a>(
        &'a self,
        step: &'a Step,
        fork: &'a Link,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<ForkDecision>> {
        Box::pin(async move {
            let Some(condition) = fork.condition_value.as_deref() else {
                return Ok(ForkDecision::run("Unconditional branch"));
            };
            let p: ForkInput = parse_input(step, input)?;
            let selector = ctx.get(&p.key).cloned().unwrap_or(Value::Null);
            if selects(&selector, condition) {
                Ok(ForkDecision::run(format!("{} selects [{}]", p.key, condition)))
            } else {
                Ok(ForkDecision::skip(format!("{} does not select [{}]", p.key, condition)))
            }
        })
    }

    fn make_output<'a>(
        &'a self,
        _step: &'a Step,
        _input: &'a Values,
        _ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async { Ok(StepOutput::empty().with_message("Forked")) })
    }
}
