//! Taskwright CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `.taskwright/config.toml` (or `--config`)
//!    and validate it.
//! 2. **Wire observability**: JSON `tracing` output on stderr and, when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the GitHub client, the selected LLM
//!    provider, and the local working-tree adapters, injected into a
//!    [`nodes::PipelineExecutor`].
//! 4. **Select the trigger**: decode the workflow event (`run`) or synthesize
//!    one from command-line arguments.
//!
//! Exit codes: 0 on success, 1 on a terminal error, 2 on a configuration
//! error (missing token, missing LLM credential, invalid settings).

mod commands;
mod config;
mod telemetry;
mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nodes::NodeOutcome;
use pipeline::workflow::labels;
use pipeline::{ErrorKind, LabelName, PullRequestId, TaskwrightError, TriggerEvent};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "taskwright", version, about = "Issue-to-pull-request automation pipeline")]
struct Cli {
    /// Settings file. Defaults to `.taskwright/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository checkout the agents work in.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle the event of the current workflow run (GITHUB_EVENT_NAME + GITHUB_EVENT_PATH).
    Run,
    /// Plan an issue into tasks.
    Analyze {
        #[arg(long)]
        issue: u64,
    },
    /// Implement a task issue.
    Implement {
        #[arg(long)]
        issue: u64,
    },
    /// Review a pull request.
    Review {
        #[arg(long)]
        pr: u64,
    },
    /// Advance the task graph after a pull request was merged or closed.
    Progress {
        #[arg(long)]
        pr: u64,
    },
    /// Apply a unified diff to a local checkout and print the result as JSON.
    Apply {
        /// File holding the diff or an agent response containing one.
        diff: PathBuf,
        /// Print the result without writing any file.
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a plan payload and print its topological order.
    CheckPlan { plan: PathBuf },
}

/// Marks a failure that should exit with the configuration code.
#[derive(Debug)]
struct ConfigurationFailure;

impl std::fmt::Display for ConfigurationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("configuration error")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = match telemetry::init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialise tracing: {e:#}");
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let configuration = e.downcast_ref::<ConfigurationFailure>().is_some()
                || e.downcast_ref::<TaskwrightError>()
                    .is_some_and(|t| t.kind() == ErrorKind::Configuration);
            error!(error = %format!("{e:#}"), "taskwright failed");
            eprintln!("error: {e:#}");
            ExitCode::from(if configuration { 2 } else { 1 })
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = config::load(cli.config.as_deref())?;

    let event = match cli.command {
        Command::Run => match listener::from_actions_env() {
            Ok(Some(event)) => event,
            Ok(None) => {
                info!("event does not trigger a node");
                return Ok(());
            }
            Err(e @ listener::ListenerError::MissingVariable { .. }) => {
                return Err(anyhow::Error::new(e).context(ConfigurationFailure));
            }
            Err(e) => return Err(e.into()),
        },
        Command::Analyze { issue } => labeled(issue, labels::ANALYZE)?,
        Command::Implement { issue } => labeled(issue, labels::IMPLEMENT)?,
        Command::Review { pr } => TriggerEvent::PullRequestUpdated {
            pr: PullRequestId::new(pr),
        },
        // The progress node re-reads the pull request, so `merged` is advisory.
        Command::Progress { pr } => TriggerEvent::PullRequestClosed {
            pr: PullRequestId::new(pr),
            merged: false,
        },
        Command::Apply { diff, dry_run } => {
            let text = std::fs::read_to_string(&diff).with_context(|| format!("read {}", diff.display()))?;
            return match commands::apply(&settings, &text, &cli.root, dry_run) {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                }
                Err((record, err)) => {
                    if let Some(record) = record {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    }
                    Err(err.into())
                }
            };
        }
        Command::CheckPlan { plan } => {
            let text = std::fs::read_to_string(&plan).with_context(|| format!("read {}", plan.display()))?;
            print!("{}", commands::check_plan(&settings, &text)?);
            return Ok(());
        }
    };

    info!(event = %event, "dispatching");
    match commands::dispatch(settings, &cli.root, event).await? {
        NodeOutcome::Completed { summary } => println!("{summary}"),
        NodeOutcome::Skipped { reason } => println!("skipped: {reason}"),
    }
    Ok(())
}

fn labeled(issue: u64, label: &str) -> anyhow::Result<TriggerEvent> {
    let label = LabelName::new(label).context("label constant is empty")?;
    Ok(TriggerEvent::IssueLabeled { issue, label })
}
