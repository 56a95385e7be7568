#![forbid(unsafe_code)]

//! `agent-relay` — runs AI-assistant CLI turns with layered MCP server
//! configuration.
//!
//! Loads configuration, wires the scope resolver, artifact builder and
//! janitor into a process supervisor, and runs one subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::config_store::FileConfigStore;
use agent_relay::diagnostics::{
    DiagnosticSink, FanoutSink, JsonlDiagnosticWriter, TracingSink,
};
use agent_relay::mcp::artifact::ArtifactBuilder;
use agent_relay::mcp::janitor::{ArtifactJanitor, GlobWorkspaceSearch};
use agent_relay::mcp::secrets::{KeyringSecretStore, SecretInjector};
use agent_relay::models::options::ProcessOptions;
use agent_relay::platform::SystemEnvironmentResolver;
use agent_relay::process::{ProcessEvent, ProcessSupervisor};
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "AI-assistant CLI turn runner", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Workspace root; supplies the workspace settings scope.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Workspace folder; supplies the most specific settings scope.
    #[arg(long, global = true)]
    folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one turn and print its events as NDJSON on stdout.
    Run {
        /// Message sent to the assistant.
        message: String,
        /// Start a new session with this id.
        #[arg(long)]
        session_id: Option<String>,
        /// Resume an existing session.
        #[arg(long)]
        resume: Option<String>,
        /// Model to request.
        #[arg(long)]
        model: Option<String>,
        /// Custom system prompt.
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Print the resolved MCP server config without running anything.
    Resolve,
    /// Remove stale config artifacts and scratch files.
    Cleanup,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

struct App {
    config: Arc<GlobalConfig>,
    diagnostics: Arc<dyn DiagnosticSink>,
    janitor: Arc<ArtifactJanitor>,
    roots: Vec<PathBuf>,
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    let config = Arc::new(config);
    info!(artifact_root = %config.artifact_root().display(), "configuration loaded");

    let mut sinks: Vec<Arc<dyn DiagnosticSink>> = vec![Arc::new(TracingSink)];
    if let Some(dir) = &config.diagnostics_dir {
        sinks.push(Arc::new(
            JsonlDiagnosticWriter::new(dir.clone())?.with_min_level(config.diagnostics_min_level),
        ));
    }
    let diagnostics: Arc<dyn DiagnosticSink> = Arc::new(FanoutSink::new(sinks));

    let janitor = Arc::new(ArtifactJanitor::new(
        Arc::new(GlobWorkspaceSearch),
        Arc::clone(&diagnostics),
    ));
    let roots: Vec<PathBuf> = args
        .workspace
        .iter()
        .chain(args.folder.iter())
        .cloned()
        .collect();

    let app = App {
        config,
        diagnostics,
        janitor,
        roots,
    };
    let supervisor = build_supervisor(&app, &args);

    match args.command {
        Command::Run {
            message,
            session_id,
            resume,
            model,
            system_prompt,
        } => {
            let cwd = match args.folder.clone().or_else(|| args.workspace.clone()) {
                Some(dir) => dir,
                None => std::env::current_dir()
                    .map_err(|err| AppError::Io(format!("cannot read current dir: {err}")))?,
            };
            let mut options = ProcessOptions::new(message, cwd);
            options.session_id = session_id;
            options.resume_session_id = resume;
            options.model = model;
            options.custom_instructions = system_prompt;

            if app.config.janitor.scratch_cleanup_on_start && !app.roots.is_empty() {
                app.janitor.cleanup_recursive(&app.roots).await;
            }
            run_turn(&app, &supervisor, options).await
        }
        Command::Resolve => {
            let (merged, enabled) = supervisor.resolve_servers().await?;
            let preview = build_artifact_builder(&app).preview(&merged);
            let output = json!({ "enabled": enabled, "config": preview });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Cleanup => {
            let stale = app.janitor.cleanup_stale(&app.config.artifact_root());
            let scratch = app.janitor.cleanup_recursive(&app.roots).await;
            info!(
                artifacts = stale.removed,
                scratch = scratch.removed,
                failed = stale.failed + scratch.failed,
                "cleanup complete"
            );
            Ok(())
        }
    }
}

async fn run_turn(app: &App, supervisor: &ProcessSupervisor, options: ProcessOptions) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(app.config.process.event_buffer);
    supervisor.start_process(options, tx).await?;

    let mut stop_requested = false;
    let code = loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ProcessEvent::Data(value)) => println!("{value}"),
                Some(ProcessEvent::Error(line)) => {
                    println!("{}", json!({ "type": "error", "data": line }));
                }
                Some(ProcessEvent::Close(code)) => break code,
                None => break None,
            },
            signal = tokio::signal::ctrl_c(), if !stop_requested => {
                if let Err(err) = signal {
                    warn!(%err, "ctrl-c handler failed");
                }
                info!("interrupt received, stopping turn");
                supervisor.stop_process();
                stop_requested = true;
            }
        }
    };

    println!("{}", json!({ "type": "close", "code": code }));
    match code {
        Some(0) => Ok(()),
        _ if stop_requested => Ok(()),
        other => Err(AppError::Process(format!("cli exited with status {other:?}"))),
    }
}

fn build_artifact_builder(app: &App) -> ArtifactBuilder {
    let secrets = Arc::new(KeyringSecretStore::from_config(&app.config.secrets));
    let injector = SecretInjector::new(
        app.config.secrets.inject_enabled,
        secrets,
        Arc::clone(&app.diagnostics),
    );
    ArtifactBuilder::new(
        app.config.artifact_root(),
        injector,
        Arc::clone(&app.janitor),
        Arc::clone(&app.diagnostics),
    )
}

fn build_supervisor(app: &App, args: &Cli) -> ProcessSupervisor {
    let mut store = FileConfigStore::new(Arc::clone(&app.diagnostics));
    if let Some(workspace) = &args.workspace {
        store = store.with_workspace(workspace);
    }
    if let Some(folder) = &args.folder {
        store = store.with_folder(folder);
    }

    ProcessSupervisor::new(
        Arc::clone(&app.config),
        Arc::new(SystemEnvironmentResolver::from_config(&app.config)),
        Arc::new(store),
        build_artifact_builder(app),
        Arc::clone(&app.diagnostics),
    )
    .with_janitor(Arc::clone(&app.janitor))
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
