//! `orchestra` – command-line shell over the Orchestra runtime.
//!
//! Builds a fresh in-process `Orchestrator` per invocation (no
//! cross-restart persistence; see spec non-goals) and drives it through
//! one of three operations: run an intent to completion, report a
//! point-in-time status snapshot, or tear down every registered agent
//! within a deadline.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use orch_coordinator::strategy::Agent;
use orch_coordinator::CoordinatorError;
use orch_orchestrator::{IntentAnalyzer, IntentError, Orchestrator, OrchestratorError, RuntimeConfig};
use orch_types::{AgentInstance, AgentType, Priority, RunStatus, Task, TaskGraph};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "orchestra", version, about = "Orchestra - multi-agent orchestration runtime CLI")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Path to a YAML runtime config; defaults are used if omitted
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an intent to completion through all six phases
    Execute {
        /// The intent driving this run
        intent: String,
        /// Capability tags the single seed task requires (defaults to "implement")
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
    /// Print a point-in-time snapshot of a freshly built runtime
    Status,
    /// Release every registered agent within a deadline
    Shutdown {
        /// Seconds to wait for every agent to release before exit code 3
        #[arg(long, default_value_t = 5)]
        deadline_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let config = match &cli.config {
        Some(path) => match RuntimeConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("config error: {e}");
                return Ok(ExitCode::from(2));
            }
        },
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Execute { intent, capabilities } => run_execute(&config, &intent, capabilities).await,
        Commands::Status => run_status(&config).await,
        Commands::Shutdown { deadline_secs } => run_shutdown(&config, deadline_secs).await,
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
    Ok(())
}

/// A demonstration agent that echoes whatever context it is handed. Stands
/// in for the real, deployment-specific agents an external collaborator
/// would register; the core never synthesizes agent behavior itself.
struct DemoAgent {
    id: String,
    agent_type: AgentType,
}

#[async_trait]
impl Agent for DemoAgent {
    fn id(&self) -> &str {
        &self.id
    }
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }
    async fn execute(&self, context: serde_json::Value) -> Result<serde_json::Value, CoordinatorError> {
        Ok(serde_json::json!({ "agent_id": self.id, "agent_type": format!("{:?}", self.agent_type), "context": context }))
    }
}

/// The CLI's Intent hook: in lieu of an LLM-backed planner, decomposes
/// every intent into one seed task tagged with the requested (or
/// default) capabilities. A real deployment supplies its own
/// `IntentAnalyzer`; the core ships none (see [`IntentAnalyzer`]'s docs).
struct SeedTaskIntentAnalyzer {
    capabilities: Vec<String>,
}

#[async_trait]
impl IntentAnalyzer for SeedTaskIntentAnalyzer {
    async fn analyze(&self, intent: &str) -> Result<TaskGraph, IntentError> {
        let mut task = Task::new("seed", intent, intent).map_err(|e| IntentError(e.to_string()))?;
        task.priority = Priority::Medium;
        for capability in &self.capabilities {
            task.required_capabilities.insert(capability.clone());
        }
        let mut graph = TaskGraph::new();
        graph.insert(task);
        Ok(graph)
    }
}

fn register_demo_agents(orchestrator: &Orchestrator) {
    for agent_type in AgentType::HIERARCHY_ORDER {
        let id = format!("{agent_type:?}-1").to_lowercase();
        orchestrator.coordinator().register_agent(
            AgentInstance::new(id.clone(), agent_type, 1),
            Arc::new(DemoAgent { id, agent_type }),
        );
    }
}

async fn run_execute(config: &RuntimeConfig, intent: &str, capabilities: Vec<String>) -> Result<ExitCode> {
    let orchestrator = Orchestrator::with_defaults(config);
    register_demo_agents(&orchestrator);

    let capabilities = if capabilities.is_empty() { vec!["implement".to_string()] } else { capabilities };
    let analyzer = SeedTaskIntentAnalyzer { capabilities };

    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id, intent, "starting run");
    let result = orchestrator.execute(run_id, intent, &analyzer).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(exit_code_for_status(result.status))
}

async fn run_status(config: &RuntimeConfig) -> Result<ExitCode> {
    let orchestrator = Orchestrator::with_defaults(config);
    register_demo_agents(&orchestrator);

    println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
    Ok(ExitCode::from(0))
}

async fn run_shutdown(config: &RuntimeConfig, deadline_secs: u64) -> Result<ExitCode> {
    let orchestrator = Orchestrator::with_defaults(config);
    register_demo_agents(&orchestrator);

    match orchestrator.shutdown(Duration::from_secs(deadline_secs)).await {
        Ok(()) => {
            println!("shutdown complete");
            Ok(ExitCode::from(0))
        }
        Err(OrchestratorError::ShutdownTimeout) => {
            eprintln!("shutdown exceeded its {deadline_secs}s deadline");
            Ok(ExitCode::from(3))
        }
        Err(e) => {
            eprintln!("shutdown error: {e}");
            Ok(ExitCode::from(1))
        }
    }
}

fn exit_code_for_status(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Completed | RunStatus::CompletedDegraded => ExitCode::from(0),
        RunStatus::Running | RunStatus::Failed => ExitCode::from(1),
    }
}
