use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use stepgraph_core::config::EngineConfig;
use stepgraph_core::context::ExecutionContext;
use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::registry::{OutboundLinkMode, Registry, StepExecutor};
use stepgraph_core::traits::{
    ForkingBehavior, RunLogSink, Transaction, TransactionManager, WorkflowStore,
    WorkflowTypeBehavior,
};
use stepgraph_core::types::*;

use crate::graph::join::find_join_point_for_links;
use crate::graph::resolver::{ContainerStack, NextStepResolver};
use crate::graph::GraphModel;

/// What to run, and with what.
#[derive(Default)]
pub struct RunInput {
    pub workflow_id: WorkflowId,
    /// Merged into the context before anything runs.
    pub values: Values,
    /// Reuse an existing context instead of starting from an empty one.
    pub context: Option<ExecutionContext>,
    /// Run inside the caller's transaction. The executor never commits,
    /// rolls back or closes it.
    pub transaction: Option<Arc<dyn Transaction>>,
    /// Run this revision instead of the workflow's current one.
    pub override_revision: Option<Revision>,
    pub test_run: bool,
}

impl RunInput {
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values.extend(values);
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_transaction(mut self, transaction: Arc<dyn Transaction>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_override_revision(mut self, revision: Revision) -> Self {
        self.override_revision = Some(revision);
        self
    }

    pub fn with_test_run(mut self, test_run: bool) -> Self {
        self.test_run = test_run;
        self
    }
}

/// Result of a run that got past configuration checks.
#[derive(Debug)]
pub struct RunOutput {
    pub context: ExecutionContext,
    pub run_log: RunLog,
    /// The error that ended the run early, if any.
    pub error: Option<StepGraphError>,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-run bookkeeping shared by the main loop and every fork branch.
struct RunState {
    graph: GraphModel,
    workflow_type: Arc<dyn WorkflowTypeBehavior>,
    next_seq_no: u32,
    log_steps: Vec<RunLogStep>,
    stack: ContainerStack,
    steps_executed: usize,
}

impl RunState {
    fn new(graph: GraphModel, workflow_type: Arc<dyn WorkflowTypeBehavior>) -> Self {
        Self {
            graph,
            workflow_type,
            next_seq_no: 1,
            log_steps: Vec::new(),
            stack: ContainerStack::new(),
            steps_executed: 0,
        }
    }

    fn take_seq_no(&mut self) -> u32 {
        let seq_no = self.next_seq_no;
        self.next_seq_no += 1;
        seq_no
    }

    fn count_step(&mut self, limit: Option<usize>) -> Result<()> {
        self.steps_executed += 1;
        match limit {
            Some(limit) if self.steps_executed > limit => {
                Err(StepGraphError::StepLimitExceeded(limit))
            }
            _ => Ok(()),
        }
    }
}

/// Everything a run needs once configuration checks have passed.
struct PreparedRun {
    workflow: Workflow,
    revision: Revision,
    graph: GraphModel,
    workflow_type: Arc<dyn WorkflowTypeBehavior>,
}

/// Runs workflows: loads a revision, walks its graph, and records a run log.
pub struct WorkflowExecutor {
    registry: Arc<Registry>,
    store: Arc<dyn WorkflowStore>,
    transactions: Option<Arc<dyn TransactionManager>>,
    run_log_sink: Option<Arc<dyn RunLogSink>>,
    config: EngineConfig,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            registry,
            store,
            transactions: None,
            run_log_sink: None,
            config: EngineConfig::default(),
        }
    }

    /// Open a transaction for every run that is not handed one.
    pub fn with_transactions(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transactions = Some(manager);
        self
    }

    /// Hand every finished run log to `sink`.
    pub fn with_run_log_sink(mut self, sink: Arc<dyn RunLogSink>) -> Self {
        self.run_log_sink = Some(sink);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run a workflow.
    ///
    /// Configuration problems (unknown workflow, revision, step type or
    /// step, unreadable step input) are returned as `Err` before any hook
    /// runs. Anything that fails after that is reported in
    /// [`RunOutput::error`] and the run log, and any transaction the
    /// executor opened is rolled back.
    pub async fn run(&self, input: RunInput) -> Result<RunOutput> {
        let RunInput {
            workflow_id,
            values,
            context,
            transaction,
            override_revision,
            test_run,
        } = input;

        let mut ctx = context.unwrap_or_default();
        ctx.merge(values);
        if test_run {
            ctx = ctx.with_test_run(true);
        }

        let mut run_log = RunLog::start(workflow_id);

        let prepared = match self.prepare(workflow_id, override_revision).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(workflow_id, error = %e, "Workflow failed configuration checks");
                run_log.had_error = true;
                run_log.error_message = Some(e.to_string());
                self.record_run(&mut run_log).await;
                return Err(e);
            }
        };

        let PreparedRun {
            workflow,
            revision,
            graph,
            workflow_type,
        } = prepared;

        run_log.revision_id = Some(revision.id);
        info!(
            workflow_id,
            revision_id = revision.id,
            run_id = %run_log.run_id,
            test_run = ctx.is_test_run(),
            "Workflow run started"
        );

        ctx.set_workflow(workflow.clone(), revision.clone());
        let mut state = RunState::new(graph, workflow_type.clone());
        let mut owned_transaction = None;

        let result = self
            .run_behavior(
                &mut state,
                &mut ctx,
                &workflow,
                &revision,
                transaction,
                &mut owned_transaction,
            )
            .await;

        run_log.steps = std::mem::take(&mut state.log_steps);

        let error = match result {
            Ok(()) => {
                info!(
                    workflow_id,
                    run_id = %run_log.run_id,
                    steps = run_log.steps.len(),
                    "Workflow run finished"
                );
                None
            }
            Err(e) => {
                warn!(workflow_id, run_id = %run_log.run_id, error = %e, "Workflow run failed");
                let replacement = workflow_type.on_error(&e, &mut ctx).await;

                if let Some(tx) = &owned_transaction {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(transaction = tx.id(), error = %rollback_err, "Failed to roll back transaction");
                    }
                }

                run_log.had_error = true;
                run_log.error_message = Some(replacement.unwrap_or_else(|| e.to_string()));
                Some(e)
            }
        };

        self.record_run(&mut run_log).await;

        if let Some(tx) = owned_transaction {
            if let Err(e) = tx.close().await {
                warn!(transaction = tx.id(), error = %e, "Failed to close transaction");
            }
            ctx.set_transaction(None);
        }

        Ok(RunOutput {
            context: ctx,
            run_log,
            error,
        })
    }

    /// Load and check everything the run depends on.
    async fn prepare(
        &self,
        workflow_id: WorkflowId,
        override_revision: Option<Revision>,
    ) -> Result<PreparedRun> {
        let workflow = self.store.get_workflow(workflow_id).await?;

        let revision = match override_revision {
            Some(revision) => revision,
            None => {
                let revision_id = workflow.current_revision_id.ok_or_else(|| {
                    StepGraphError::Config(format!(
                        "Workflow {} has no current revision",
                        workflow_id
                    ))
                })?;
                self.store.get_revision(revision_id).await?
            }
        };

        let graph = GraphModel::from_revision(&revision);
        graph.validate()?;

        for step in &revision.steps {
            let step_type = self.registry.step_type(&step.step_type_name)?;
            step.input_values()?;
            if step_type.executor.is_none()
                && step_type.outbound_link_mode != OutboundLinkMode::Container
            {
                return Err(StepGraphError::Config(format!(
                    "Step type {} has no executor",
                    step_type.name
                )));
            }
        }

        let workflow_type = self
            .registry
            .workflow_type(&workflow.workflow_type_name)?
            .behavior
            .clone();

        Ok(PreparedRun {
            workflow,
            revision,
            graph,
            workflow_type,
        })
    }

    /// Hooks, transaction handling and the step loop for one run.
    async fn run_behavior(
        &self,
        state: &mut RunState,
        ctx: &mut ExecutionContext,
        workflow: &Workflow,
        revision: &Revision,
        transaction: Option<Arc<dyn Transaction>>,
        owned_transaction: &mut Option<Arc<dyn Transaction>>,
    ) -> Result<()> {
        let workflow_type = state.workflow_type.clone();
        workflow_type.pre_run(ctx).await?;

        match transaction {
            Some(tx) => ctx.set_transaction(Some(tx)),
            None => {
                if let Some(manager) = &self.transactions {
                    let tx = manager.open(workflow, revision).await?;
                    debug!(transaction = tx.id(), "Opened transaction for run");
                    *owned_transaction = Some(tx.clone());
                    ctx.set_transaction(Some(tx));
                }
            }
        }

        let start = state.graph.start_step_no();
        self.run_step_loop(state, ctx, start, None, 0).await?;

        workflow_type.post_run(ctx).await?;

        if let Some(tx) = owned_transaction.as_ref() {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Walk the graph from `start` until the path ends, the next step is
    /// `stop`, or a step asks for the workflow to halt.
    ///
    /// Returns `true` when the run should halt.
    fn run_step_loop<'a>(
        &'a self,
        state: &'a mut RunState,
        ctx: &'a mut ExecutionContext,
        start: Option<StepNo>,
        stop: Option<StepNo>,
        depth: usize,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut current = start;

            while let Some(step_no) = current {
                let step = state.graph.step(step_no)?.clone();
                state.count_step(self.config.step_limit())?;

                debug!(step_no, step_type = %step.step_type_name, depth, "Executing step");
                let started_at = Utc::now();
                let output = self.execute_step(state, ctx, &step, depth).await?;

                let next = NextStepResolver::new(&state.graph, &self.registry, self.config.max_depth)
                    .resolve(&step, &output.value, &mut state.stack)?;

                let seq_no = state.take_seq_no();
                state
                    .log_steps
                    .push(RunLogStep::new(seq_no, step_no, started_at, &output));

                if stop.is_some() && next == stop {
                    debug!(step_no, stop = ?stop, "Reached stop step");
                    return Ok(false);
                }

                if output.halt {
                    info!(step_no, "Step requested the workflow to halt");
                    return Ok(true);
                }

                current = next;
            }

            Ok(false)
        })
    }

    async fn execute_step(
        &self,
        state: &mut RunState,
        ctx: &mut ExecutionContext,
        step: &Step,
        depth: usize,
    ) -> Result<StepOutput> {
        let step_type = self.registry.step_type(&step.step_type_name)?;
        if step_type.outbound_link_mode == OutboundLinkMode::Container {
            return Ok(StepOutput::empty());
        }

        let executor = step_type.executor.clone().ok_or_else(|| {
            StepGraphError::Config(format!("Step type {} has no executor", step_type.name))
        })?;

        let workflow_type = state.workflow_type.clone();
        workflow_type.pre_step(step, ctx).await?;

        let input = step.input_values()?;
        let output = match executor {
            StepExecutor::Simple(behavior) => behavior.execute(step, &input, ctx).await?,
            StepExecutor::Forking(behavior) => {
                self.run_forking_step(state, ctx, step, &input, behavior, depth)
                    .await?
            }
        };

        workflow_type.post_step(step, ctx, output).await
    }

    /// Run the branches of a VARIABLE step, each as a step loop bounded by
    /// the point where the branches meet again.
    async fn run_forking_step(
        &self,
        state: &mut RunState,
        ctx: &mut ExecutionContext,
        step: &Step,
        input: &Values,
        behavior: Arc<dyn ForkingBehavior>,
        depth: usize,
    ) -> Result<StepOutput> {
        if depth >= self.config.max_depth {
            return Err(StepGraphError::MaxDepthExceeded(self.config.max_depth));
        }

        behavior.pre_run(step, input, ctx).await?;

        let mut forks = state.graph.outbound(step.step_no).to_vec();
        behavior.sort_forks(&mut forks, step, input, ctx);
        let join = find_join_point_for_links(&state.graph, &forks);

        let mut halted = false;
        for fork in &forks {
            let seq_no = state.take_seq_no();
            let started_at = Utc::now();

            let decision = behavior.include_fork(step, fork, input, ctx).await?;
            debug!(
                step_no = step.step_no,
                to_step_no = ?fork.to_step_no,
                condition = ?fork.condition_value,
                activate = decision.activate,
                "Fork decision"
            );

            if decision.activate {
                // A branch that leads straight to the join has no steps of its own.
                if let Some(first) = fork.to_step_no.filter(|to| Some(*to) != join) {
                    halted = self
                        .run_step_loop(state, ctx, Some(first), join, depth + 1)
                        .await?;
                }
            }

            let branch_output = StepOutput {
                value: Value::Bool(decision.activate),
                message: decision.message,
                halt: false,
            };
            state.log_steps.push(RunLogStep::new(
                seq_no,
                step.step_no,
                started_at,
                &branch_output,
            ));

            if halted {
                info!(step_no = step.step_no, "Fork branch halted the workflow");
                break;
            }
        }

        let mut output = behavior.make_output(step, input, ctx).await?;
        behavior.post_run(step, input, ctx).await?;

        if halted {
            output.halt = true;
        }
        Ok(output)
    }

    async fn record_run(&self, run_log: &mut RunLog) {
        run_log.ended_at = Some(Utc::now());
        if let Some(sink) = &self.run_log_sink {
            if let Err(e) = sink.record_run(run_log).await {
                warn!(run_id = %run_log.run_id, error = %e, "Failed to record workflow run log");
            }
        }
    }
}
