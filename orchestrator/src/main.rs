//! Orchestrator CLI
//!
//! Runs the reference agents (planner, executor, reviewer) behind one
//! orchestrator.
//!
//! Usage:
//!   orchestrator agents list
//!   orchestrator agents show planner
//!   orchestrator workflow plan "Build and test a feature"
//!   orchestrator workflow run release.toml
//!   orchestrator review src/lib.rs --require tests
//!   orchestrator loop "Search for rust async runtimes"

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent::{AgentTask, Priority};
use orchestrator::{
    AgenticLoopOptions, FileConfig, Orchestrator, StepStatus, Workflow, WorkflowStatus,
};

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Multi-agent task dispatch and workflow orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the nearest .orchestrator.toml)
    #[arg(long, short, env = "ORCHESTRATOR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Print raw JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Workflow planning and execution
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Agent inspection
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Review a file with the reviewer agent
    Review {
        /// File to review
        file: PathBuf,

        /// Keyword the content must contain (repeatable)
        #[arg(long = "require", short = 'r')]
        requirements: Vec<String>,

        /// Run a security audit instead of a full review
        #[arg(long)]
        security: bool,
    },
    /// Run an objective through the agentic feedback loop
    Loop {
        /// Objective handed to the executor
        objective: String,

        /// Iteration cap (defaults to [orchestrator] max_loop_iterations)
        #[arg(long)]
        max_iterations: Option<usize>,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Plan a workflow for an objective
    Plan {
        /// Objective to decompose
        objective: String,

        /// Execute the planned workflow
        #[arg(long)]
        run: bool,
    },
    /// Run a workflow from a TOML file
    Run {
        /// Workflow file
        file: PathBuf,
    },
    /// Show a workflow file without running it
    Show {
        /// Workflow file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// List registered agents
    List,
    /// Show one agent
    Show {
        /// Agent id
        agent: String,
    },
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI first to get verbosity before initializing tracing
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let file_config = match &cli.config {
        Some(path) => FileConfig::load_from_path(path)?,
        None => FileConfig::load()?,
    };
    let orchestrator = Orchestrator::with_reference_agents(&file_config).await;

    match cli.command {
        Commands::Workflow { command } => run_workflow_command(&orchestrator, command, cli.json).await,
        Commands::Agents { command } => run_agents_command(&orchestrator, command, cli.json).await,
        Commands::Review {
            file,
            requirements,
            security,
        } => run_review(&orchestrator, &file, requirements, security, cli.json).await,
        Commands::Loop {
            objective,
            max_iterations,
        } => {
            let max_iterations =
                max_iterations.unwrap_or(file_config.orchestrator.max_loop_iterations);
            run_loop(&orchestrator, &objective, max_iterations, cli.json).await
        }
    }
}

async fn run_workflow_command(
    orchestrator: &Orchestrator,
    command: WorkflowCommands,
    as_json: bool,
) -> Result<()> {
    match command {
        WorkflowCommands::Plan { objective, run } => {
            let mut workflow = orchestrator.plan_workflow(&objective, None).await?;
            if run {
                orchestrator.execute_workflow(&mut workflow).await?;
            }
            print_workflow(&workflow, as_json)?;
            if run && workflow.status != WorkflowStatus::Completed {
                std::process::exit(1);
            }
        }

        WorkflowCommands::Run { file } => {
            let mut workflow = Workflow::from_toml_file(&file)?;
            orchestrator.execute_workflow(&mut workflow).await?;
            print_workflow(&workflow, as_json)?;
            if workflow.status != WorkflowStatus::Completed {
                std::process::exit(1);
            }
        }

        WorkflowCommands::Show { file } => {
            let workflow = Workflow::from_toml_file(&file)?;
            orchestrator::dag::validate(&workflow)?;
            print_workflow(&workflow, as_json)?;
        }
    }

    Ok(())
}

async fn run_agents_command(orchestrator: &Orchestrator, command: AgentCommands, as_json: bool) -> Result<()> {
    match command {
        AgentCommands::List => {
            let agents = orchestrator.list_agents().await;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&agents)?);
                return Ok(());
            }
            println!("Registered Agents:\n");
            for agent in agents {
                println!("  {} ({}) [{}] - {}", agent.id, agent.role, agent.status, agent.name);
                let names: Vec<_> = agent.capabilities.iter().map(|c| c.name.as_str()).collect();
                if !names.is_empty() {
                    println!("    Capabilities: {}", names.join(", "));
                }
            }
        }

        AgentCommands::Show { agent } => match orchestrator.get_agent(&agent).await {
            Some(descriptor) => {
                if as_json {
                    println!("{}", serde_json::to_string_pretty(&descriptor)?);
                    return Ok(());
                }
                println!("Agent: {}\n", descriptor.id);
                println!("Name: {}", descriptor.name);
                println!("Role: {}", descriptor.role);
                println!("Status: {}", descriptor.status);
                println!("\nCapabilities:");
                for capability in &descriptor.capabilities {
                    println!("  {} - {}", capability.name, capability.description);
                }
            }
            None => {
                eprintln!("Agent '{}' not found.", agent);
                eprintln!("Use 'orchestrator agents list' to see registered agents.");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

async fn run_review(
    orchestrator: &Orchestrator,
    file: &Path,
    requirements: Vec<String>,
    security: bool,
    as_json: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let task_type = if security { "security" } else { "review" };
    let task = AgentTask::new(task_type, format!("Review {}", file.display()))
        .with_priority(Priority::High)
        .with_input(json!({ "content": content, "requirements": requirements }));

    let result = orchestrator.execute_task(&task, Some("reviewer")).await?;
    if !result.success {
        bail!("review failed: {}", result.error.unwrap_or_default());
    }
    if as_json {
        println!("{}", serde_json::to_string_pretty(&result.output)?);
        return Ok(());
    }

    let output = &result.output;
    if security {
        println!("Risk: {}  Score: {}", output["risk_level"], output["score"]);
    } else {
        println!(
            "Score: {}  Grade: {}  Passes: {}",
            output["score"], output["grade"], output["passes_requirements"]
        );
    }
    if let Some(issues) = output["issues"].as_array() {
        println!("\nIssues ({}):", issues.len());
        for issue in issues {
            println!(
                "  line {} [{}] {}: {}",
                issue["line"], issue["severity"], issue["rule_id"], issue["message"]
            );
        }
    }
    let hints = if security { &output["recommendations"] } else { &output["suggestions"] };
    if let Some(hints) = hints.as_array().filter(|h| !h.is_empty()) {
        println!("\nSuggestions:");
        for hint in hints {
            println!("  - {}", hint.as_str().unwrap_or_default());
        }
    }
    Ok(())
}

async fn run_loop(orchestrator: &Orchestrator, objective: &str, max_iterations: usize, as_json: bool) -> Result<()> {
    let task = AgentTask::new("execute", objective);
    let options = AgenticLoopOptions::default()
        .with_max_iterations(max_iterations)
        .until_success();
    let results = orchestrator.agentic_loop(task, options).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for (i, result) in results.iter().enumerate() {
            let outcome = match &result.error {
                None => "ok".to_string(),
                Some(error) => format!("failed: {}", error),
            };
            println!("{}. {} [{}] {}", i + 1, result.task_id, result.agent_id, outcome);
        }
    }
    if !results.last().is_some_and(|r| r.success) {
        std::process::exit(1);
    }
    Ok(())
}

fn print_workflow(workflow: &Workflow, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(workflow)?);
        return Ok(());
    }

    println!("Workflow: {} ({})", workflow.name, workflow.id);
    if !workflow.description.is_empty() {
        println!("Description: {}", workflow.description);
    }
    println!("\nSteps:");
    for (i, step) in workflow.steps.iter().enumerate() {
        println!("  {}. [{}] {} -> {}", i + 1, step.status, step.id, step.agent_id);
        println!("     {}: {}", step.task.task_type, step.task.description);
        if !step.task.dependencies.is_empty() {
            println!("     After: {}", step.task.dependencies.join(", "));
        }
        if step.status == StepStatus::Failed {
            if let Some(error) = step.result.as_ref().and_then(|r| r.error.as_ref()) {
                println!("     Error: {}", error);
            }
        }
    }

    println!("\nWorkflow Status: {:?}", workflow.status);
    println!(
        "Steps completed: {}/{}",
        workflow.count(StepStatus::Completed),
        workflow.steps.len()
    );
    if let Some(error) = &workflow.error {
        println!("Error: {}", error);
    }
    Ok(())
}
