//! taskgrid command line entry point

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use taskgrid::runtime::shell_task_executor;
use taskgrid::{
    stage_specs_from_json, CoreConfig, CoreRuntime, EngineProtocol, ExecutionMode, Payload,
    Pipeline, PipelineStatus, TracingSink,
};
use tokio::signal;
use tracing::{error, info, warn};

/// Bounded-concurrency task runner
#[derive(Parser)]
#[command(name = "taskgrid")]
#[command(about = "Run staged pipelines and one-off tasks with bounded concurrency")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "TASKGRID_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline definition file
    Run {
        /// JSON file with `name`, `stages` and optional `metadata`
        pipeline: PathBuf,
    },
    /// Execute one command through the execution engine
    Exec {
        command: String,
        /// instant, fast, standard or background
        #[arg(long)]
        mode: Option<String>,
        /// JSON object passed as the task input
        #[arg(long, value_name = "JSON")]
        input: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Deserialize)]
struct PipelineFile {
    name: String,
    stages: Value,
    #[serde(default)]
    metadata: Payload,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    taskgrid::observability::init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { pipeline } => run_pipeline_file(&config, &pipeline).await,
        Commands::Exec {
            command,
            mode,
            input,
        } => exec_command(&config, command, mode, input).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> CliResult<CoreConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(CoreConfig::load_from_file(path)?);
    }

    for candidate in ["taskgrid.toml", "config/taskgrid.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(CoreConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(CoreConfig::default())
}

fn build_runtime(config: &CoreConfig) -> CliResult<CoreRuntime> {
    let executor = shell_task_executor(&config.executor);
    Ok(CoreRuntime::from_config_with_sink(
        config,
        executor,
        std::sync::Arc::new(TracingSink),
    )?)
}

async fn run_pipeline_file(config: &CoreConfig, path: &Path) -> CliResult<()> {
    let content = std::fs::read_to_string(path)?;
    let file: PipelineFile = serde_json::from_str(&content)?;
    let specs = stage_specs_from_json(file.stages)?;

    let runtime = build_runtime(config)?;
    runtime.start();
    let orchestrator = runtime.orchestrator();
    let pipeline = orchestrator.create_pipeline(file.name, specs, file.metadata)?;

    let run = runtime
        .run_pipeline_until(pipeline.id, async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    for (agent_type, report) in &run.drain_reports {
        if report.timed_out {
            warn!(
                agent_type = %agent_type,
                still_active = report.still_active,
                "Pool did not drain in time"
            );
        }
    }

    let final_state: Option<Pipeline> = orchestrator.get_pipeline(pipeline.id);
    if let Some(state) = &final_state {
        println!("{}", serde_json::to_string_pretty(state)?);
    }

    match run.outcome {
        Some(Ok(_)) if !run.interrupted => Ok(()),
        Some(Err(e)) => Err(e.into()),
        _ => Err(format!(
            "pipeline interrupted while {:?}",
            final_state.map(|p| p.status()).unwrap_or(PipelineStatus::Pending)
        )
        .into()),
    }
}

async fn exec_command(
    config: &CoreConfig,
    command: String,
    mode: Option<String>,
    input: Option<String>,
) -> CliResult<()> {
    let mode = mode
        .map(|m| m.parse::<ExecutionMode>())
        .transpose()?;
    let input_data: Payload = match input {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Payload::new(),
    };

    let runtime = build_runtime(config)?;
    runtime.start();
    let engine = runtime.engine();

    let summary = engine
        .execute(serde_json::json!({
            "command": command,
            "input_data": input_data,
            "mode": mode,
        }))
        .await;
    engine.stop();

    println!("{}", serde_json::to_string_pretty(&summary?)?);
    Ok(())
}

fn handle_config_command(config: &CoreConfig, show: bool) -> CliResult<()> {
    config.validate()?;
    info!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
