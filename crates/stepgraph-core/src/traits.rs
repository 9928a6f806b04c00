use futures::future::BoxFuture;

use crate::context::ExecutionContext;
use crate::error::{Result, StepGraphError};
use crate::types::*;

/// What a step type does when the loop reaches it.
pub trait StepBehavior: Send + Sync + 'static {
    /// Execute the step with its parsed input values.
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>>;

    /// Check a step's configuration before a revision is stored.
    /// Returns human-readable problems; empty means valid.
    fn validate(&self, step: &Step, input: &Values) -> Vec<String> {
        let _ = (step, input);
        Vec::new()
    }

    /// Summary saved with the step when a revision is stored, built from
    /// its input. `None` keeps the summary the step came with.
    fn dynamic_summary(&self, step: &Step, input: &Values) -> Option<String> {
        let _ = (step, input);
        None
    }
}

/// Whether a fork branch should run, and what to log for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkDecision {
    pub activate: bool,
    pub message: Option<String>,
}

impl ForkDecision {
    pub fn run(message: impl Into<String>) -> Self {
        Self {
            activate: true,
            message: Some(message.into()),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self {
            activate: false,
            message: Some(message.into()),
        }
    }
}

/// Behavior of a VARIABLE-mode step: decides which of its outbound
/// branches run. The executor drives the branches itself.
pub trait ForkingBehavior: Send + Sync + 'static {
    /// Runs before anything else for the step.
    fn pre_run<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        let _ = (step, input, ctx);
        Box::pin(async { Ok(()) })
    }

    /// Put the forks in the order they should execute. Default keeps
    /// stored order.
    fn sort_forks(
        &self,
        forks: &mut Vec<Link>,
        step: &Step,
        input: &Values,
        ctx: &ExecutionContext,
    ) {
        let _ = (forks, step, input, ctx);
    }

    /// Decide whether a single fork runs.
    fn include_fork<'a>(
        &'a self,
        step: &'a Step,
        fork: &'a Link,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<ForkDecision>>;

    /// Output for the step as a whole, after its forks ran.
    fn make_output<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepOutput>>;

    /// Runs after everything else for the step.
    fn post_run<'a>(
        &'a self,
        step: &'a Step,
        input: &'a Values,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        let _ = (step, input, ctx);
        Box::pin(async { Ok(()) })
    }
}

/// Workflow-type hooks around a whole run and around each step.
pub trait WorkflowTypeBehavior: Send + Sync + 'static {
    /// Check a revision as a whole before it is stored, such as rules
    /// about how steps relate to each other.
    fn validate(&self, revision: &Revision) -> Vec<String> {
        let _ = revision;
        Vec::new()
    }

    fn pre_run<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    fn post_run<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<()>> {
        let _ = ctx;
        Box::pin(async { Ok(()) })
    }

    /// Called when a run fails. May return a replacement for the error
    /// message recorded in the run log.
    fn on_error<'a>(
        &'a self,
        error: &'a StepGraphError,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Option<String>> {
        let _ = (error, ctx);
        Box::pin(async { None })
    }

    fn pre_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<()>> {
        let _ = (step, ctx);
        Box::pin(async { Ok(()) })
    }

    /// May rewrite the step's output before the next step is resolved.
    fn post_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut ExecutionContext,
        output: StepOutput,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        let _ = (step, ctx);
        Box::pin(async move { Ok(output) })
    }
}

/// Read side of workflow persistence.
pub trait WorkflowStore: Send + Sync + 'static {
    /// Load a workflow, failing with `WorkflowNotFound`.
    fn get_workflow(&self, id: WorkflowId) -> BoxFuture<'_, Result<Workflow>>;

    /// Load a revision with its steps and links, failing with
    /// `RevisionNotFound`.
    fn get_revision(&self, id: RevisionId) -> BoxFuture<'_, Result<Revision>>;
}

/// A unit of work. Shared between the caller, the context, and the
/// executor, so all operations take `&self`.
pub trait Transaction: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn commit(&self) -> BoxFuture<'_, Result<()>>;

    fn rollback(&self) -> BoxFuture<'_, Result<()>>;

    /// Release the transaction. Rolls back anything still uncommitted.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Opens transactions for runs that were not handed one.
pub trait TransactionManager: Send + Sync + 'static {
    fn open<'a>(
        &'a self,
        workflow: &'a Workflow,
        revision: &'a Revision,
    ) -> BoxFuture<'a, Result<std::sync::Arc<dyn Transaction>>>;
}

/// Receives the finished run log of every run.
pub trait RunLogSink: Send + Sync + 'static {
    fn record_run<'a>(&'a self, run_log: &'a RunLog) -> BoxFuture<'a, Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHooks;
    impl WorkflowTypeBehavior for NoHooks {}

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        let mut ctx = ExecutionContext::new();
        let step = Step::new(1, "noop");
        let output = StepOutput::new(5).with_message("five").halting();

        NoHooks.pre_run(&mut ctx).await.unwrap();
        NoHooks.pre_step(&step, &mut ctx).await.unwrap();
        let after = NoHooks.post_step(&step, &mut ctx, output.clone()).await.unwrap();
        assert_eq!(after, output);

        let err = StepGraphError::step_failed(1, "boom");
        assert_eq!(NoHooks.on_error(&err, &mut ctx).await, None);
        NoHooks.post_run(&mut ctx).await.unwrap();
        assert!(ctx.values().is_empty());
        assert!(NoHooks.validate(&Revision::draft(1, 1)).is_empty());
    }

    #[test]
    fn test_fork_decision() {
        assert!(ForkDecision::run("yes").activate);
        let skip = ForkDecision::skip("no");
        assert!(!skip.activate);
        assert_eq!(skip.message.as_deref(), Some("no"));
    }
}
