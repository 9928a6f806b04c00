mod definition;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stepgraph_core::config::AppConfig;
use stepgraph_core::types::{Values, WorkflowId};
use stepgraph_core::Registry;
use stepgraph_engine::tree::{build_tree, NodeSequence};
use stepgraph_engine::{builtin_registry, RunInput, WorkflowExecutor};
use stepgraph_store::SqliteStore;

use crate::definition::WorkflowDefinition;

#[derive(Parser)]
#[command(name = "stepgraph", version, about = "Run graph-based workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "stepgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a workflow definition as a new revision
    Import {
        /// TOML definition file
        file: PathBuf,
        /// Add the revision to an existing workflow instead of creating one
        #[arg(long)]
        workflow_id: Option<WorkflowId>,
    },
    /// Validate a definition file without storing it
    Check {
        file: PathBuf,
    },
    /// Run a stored workflow
    Run {
        workflow_id: WorkflowId,
        /// Initial variable, as key=json (plain text if not valid JSON)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        values: Vec<String>,
        /// Run a definition file instead of the stored current revision
        #[arg(long)]
        file: Option<PathBuf>,
        /// Mark the run as a test run
        #[arg(long)]
        test_run: bool,
    },
    /// Print the current revision of a workflow as a tree
    Tree {
        workflow_id: WorkflowId,
        /// Print JSON instead of an indented outline
        #[arg(long)]
        json: bool,
    },
    /// List recent runs of a workflow
    Runs {
        workflow_id: WorkflowId,
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Also print each run's log entries
        #[arg(long)]
        steps: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "stepgraph", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let registry = Arc::new(builtin_registry());

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Check { file } => {
            let definition = WorkflowDefinition::load(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            check(&registry, &definition)?;
            println!(
                "{}: {} steps, {} links, OK",
                definition.name,
                definition.steps.len(),
                definition.links.len()
            );
        }
        Commands::Import { file, workflow_id } => {
            let definition = WorkflowDefinition::load(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            check(&registry, &definition)?;

            let store = open_store(&config, &registry)?;
            let workflow = match workflow_id {
                Some(id) => store.find_workflow(id)?,
                None => store.create_workflow(&definition.name, &definition.workflow_type)?,
            };
            let revision = store.store_revision(workflow.id, definition.to_new_revision())?;
            info!(workflow_id = workflow.id, revision_id = revision.id, "Imported definition");
            println!(
                "workflow {} revision {} (version {})",
                workflow.id, revision.id, revision.version_no
            );
        }
        Commands::Run {
            workflow_id,
            values,
            file,
            test_run,
        } => {
            let store = open_store(&config, &registry)?;
            let executor = WorkflowExecutor::new(registry.clone(), store.clone())
                .with_run_log_sink(store.clone())
                .with_transactions(store.clone())
                .with_config(config.engine.clone());

            let mut input = RunInput::new(workflow_id)
                .with_values(parse_values(&values)?)
                .with_test_run(test_run);
            if let Some(file) = file {
                let definition = WorkflowDefinition::load(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                check(&registry, &definition)?;
                input = input.with_override_revision(definition.to_revision(workflow_id));
            }

            let output = executor.run(input).await?;
            for entry in &output.run_log.steps {
                println!(
                    "#{:<3} step {:<4} {:<12} {}",
                    entry.seq_no,
                    entry.step_no,
                    entry.output_data.as_deref().unwrap_or("-"),
                    entry.message.as_deref().unwrap_or("")
                );
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&Value::Object(output.context.values().clone()))?
            );
            if let Some(e) = output.error {
                bail!("run {} failed: {}", output.run_log.run_id, e);
            }
        }
        Commands::Tree { workflow_id, json } => {
            let store = open_store(&config, &registry)?;
            let workflow = store.find_workflow(workflow_id)?;
            let Some(revision_id) = workflow.current_revision_id else {
                bail!("workflow {} has no revision", workflow_id);
            };
            let revision = store.load_revision(revision_id)?;
            let tree = build_tree(
                &registry,
                revision.start_step_no,
                &revision.steps,
                &revision.links,
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print_sequence(&tree, 0);
            }
        }
        Commands::Runs {
            workflow_id,
            limit,
            steps,
        } => {
            let store = open_store(&config, &registry)?;
            let runs = store.list_runs(workflow_id, limit)?;
            if runs.is_empty() {
                println!("No runs.");
            }
            for run in runs {
                let status = if run.had_error { "FAILED" } else { "ok" };
                println!(
                    "{}  {}  {:<6} {} steps  {}",
                    run.run_id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    status,
                    run.step_count,
                    run.error_message.as_deref().unwrap_or("")
                );
                if steps {
                    for entry in store.load_run_steps(&run.run_id)? {
                        println!(
                            "    #{:<3} step {:<4} {}",
                            entry.seq_no,
                            entry.step_no,
                            entry.message.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

fn open_store(config: &AppConfig, registry: &Arc<Registry>) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.store_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("opening {}", path.display()))?
        .with_registry(registry.clone());
    Ok(Arc::new(store))
}

fn check(registry: &Registry, definition: &WorkflowDefinition) -> anyhow::Result<()> {
    let problems =
        registry.validate_revision(&definition.workflow_type, &definition.to_revision(0));
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  {}", problem);
        }
        bail!("{}: {} problem(s)", definition.name, problems.len());
    }
    Ok(())
}

/// Parse `key=value` pairs; values that are not valid JSON are kept as
/// strings.
fn parse_values(pairs: &[String]) -> anyhow::Result<Values> {
    let mut values = Values::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got {}", pair);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        values.insert(key.trim().to_string(), value);
    }
    Ok(values)
}

fn print_sequence(sequence: &NodeSequence, indent: usize) {
    let pad = "  ".repeat(indent);
    for node in &sequence.nodes {
        let summary = node
            .step
            .summary
            .as_deref()
            .map(|s| format!("  ({})", s))
            .unwrap_or_default();
        println!(
            "{}{} {}{}",
            pad, node.step.step_no, node.step.step_type_name, summary
        );
        for branch in &node.branches {
            println!(
                "{}  [{}]",
                pad,
                branch.condition.as_deref().unwrap_or("always")
            );
            print_sequence(&branch.sequence, indent + 2);
        }
    }
}
