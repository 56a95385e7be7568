//! Single-flight supervisor for CLI turns.
//!
//! A turn moves through `Idle → Starting → Running → Idle`; any failure
//! while starting returns to `Idle`. The state lives behind one mutex and
//! each turn carries a generation number, so a late exit from an old turn
//! can never clear the state of a newer one.
//!
//! Once spawned, the child is owned by a driver task that waits for exit
//! (or for the kill token), drains the stdout and stderr readers for a
//! bounded time, removes the turn's config artifact, clears the state and
//! only then delivers [`ProcessEvent::Close`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::config_store::ConfigStore;
use crate::diagnostics::DiagnosticSink;
use crate::mcp::artifact::{ArtifactBuilder, BuiltArtifact};
use crate::mcp::janitor::ArtifactJanitor;
use crate::mcp::resolver::ScopeResolver;
use crate::models::options::{ExecutionEnvironment, ProcessOptions};
use crate::models::server::MergedServerSet;
use crate::platform::EnvironmentResolver;
use crate::process::args::build_args;
use crate::process::reader::{read_stderr, read_stdout};
use crate::process::writer::{user_message, write_message};
use crate::process::{shutdown, ProcessEvent};
use crate::{AppError, Result};

// ── State ───────────────────────────────────────────────────────

/// Lifecycle of the single turn slot. `Starting` holds the slot while the
/// environment is resolved and the artifact is written, before a pid
/// exists.
#[derive(Debug)]
enum SupervisorState {
    Idle,
    Starting {
        generation: u64,
    },
    Running {
        generation: u64,
        pid: Option<u32>,
        kill: CancellationToken,
    },
}

impl SupervisorState {
    fn generation(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Starting { generation } | Self::Running { generation, .. } => Some(*generation),
        }
    }
}

/// Everything resolved for a turn before anything is spawned.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    /// Executable, working directory and environment.
    pub environment: ExecutionEnvironment,
    /// Written MCP artifact, if any servers are enabled.
    pub artifact: Option<BuiltArtifact>,
    /// CLI arguments.
    pub args: Vec<String>,
}

// ── Supervisor ──────────────────────────────────────────────────

/// Runs at most one CLI process at a time.
///
/// Each turn is fed a single user message on stdin and streams its output
/// back as [`ProcessEvent`]s on the channel passed to
/// [`ProcessSupervisor::start_process`]. Dropping the supervisor disposes
/// of any running turn.
pub struct ProcessSupervisor {
    config: Arc<GlobalConfig>,
    environment: Arc<dyn EnvironmentResolver>,
    store: Arc<dyn ConfigStore>,
    resolver: ScopeResolver,
    builder: ArtifactBuilder,
    janitor: Option<Arc<ArtifactJanitor>>,
    state: Arc<Mutex<SupervisorState>>,
    generation: AtomicU64,
}

impl ProcessSupervisor {
    /// Supervisor wired to its collaborators.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        environment: Arc<dyn EnvironmentResolver>,
        store: Arc<dyn ConfigStore>,
        builder: ArtifactBuilder,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            config,
            environment,
            store,
            resolver: ScopeResolver::new(diagnostics),
            builder,
            janitor: None,
            state: Arc::new(Mutex::new(SupervisorState::Idle)),
            generation: AtomicU64::new(0),
        }
    }

    /// Sweep scratch files from the turn's working directory after each
    /// turn closes.
    #[must_use]
    pub fn with_janitor(mut self, janitor: Arc<ArtifactJanitor>) -> Self {
        self.janitor = Some(janitor);
        self
    }

    /// Merge the configured scopes into the enabled server set and flag.
    ///
    /// # Errors
    ///
    /// Propagates [`ConfigStore`] failures.
    pub async fn resolve_servers(&self) -> Result<(MergedServerSet, bool)> {
        let servers = self.store.inspect_servers().await?;
        let enabled = self.store.inspect_enabled().await?;

        let layers = self.resolver.layers_from(&servers);
        let merged = self.resolver.resolve_servers(&layers);
        let enabled = ScopeResolver::resolve_enabled(&enabled);
        debug!(servers = merged.len(), enabled, "mcp servers resolved");
        Ok((merged, enabled))
    }

    /// Resolve the environment, write the artifact and build the arguments
    /// for `options` without spawning.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the executable cannot be found and
    /// [`AppError::Artifact`] if the artifact cannot be written.
    pub async fn prepare(&self, options: &ProcessOptions) -> Result<PreparedTurn> {
        let environment = self.environment.resolve(&options.cwd).await?;
        let (merged, enabled) = self.resolve_servers().await?;
        let artifact = self.builder.build(&merged, enabled).await?;

        let fragments = if enabled {
            merged.prompt_fragments()
        } else {
            Vec::new()
        };
        let args = build_args(
            &self.config,
            options,
            artifact.as_ref().map(|a| a.path.as_path()),
            &fragments,
        );

        Ok(PreparedTurn {
            environment,
            artifact,
            args,
        })
    }

    /// Start a turn, delivering its events to `events`.
    ///
    /// Returns once the process is spawned and its tasks are running; the
    /// turn ends with [`ProcessEvent::Close`].
    ///
    /// # Errors
    ///
    /// - [`AppError::AlreadyRunning`] if a turn is in flight. Nothing is
    ///   resolved or spawned in that case.
    /// - Any error from [`ProcessSupervisor::prepare`].
    /// - [`AppError::Spawn`] if the OS refuses to start the process. The
    ///   failure is also delivered as `Error` followed by `Close(None)`.
    pub async fn start_process(
        &self,
        options: ProcessOptions,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<()> {
        let generation = self.begin()?;
        let span = info_span!("turn", generation);

        let result = self
            .launch(generation, &options, events)
            .instrument(span)
            .await;
        if let Err(err) = &result {
            warn!(generation, %err, "turn failed to start");
            release(&self.state, generation);
        }
        result
    }

    /// Stop the running turn, if any.
    ///
    /// The supervisor is idle as soon as this returns. The process group is
    /// asked to exit and force-killed after the configured grace period.
    pub fn stop_process(&self) {
        let previous = std::mem::replace(&mut *self.lock(), SupervisorState::Idle);
        match previous {
            SupervisorState::Idle => debug!("stop requested with no turn in flight"),
            SupervisorState::Starting { generation } => {
                info!(generation, "stop requested before spawn");
            }
            SupervisorState::Running {
                generation,
                pid,
                kill,
            } => {
                info!(generation, ?pid, "stopping cli process");
                shutdown::terminate(pid, &kill, self.config.stop_grace_period());
            }
        }
    }

    /// Kill any running process without waiting for it.
    ///
    /// Unlike [`ProcessSupervisor::stop_process`] there is no graceful
    /// request and no grace period: the process group receives the forced
    /// kill immediately. The turn still ends with `Close` from its driver.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lock(), SupervisorState::Idle);
        if let SupervisorState::Running { pid, kill, .. } = previous {
            if let Some(pid) = pid {
                let _ = shutdown::force_kill(pid);
            }
            kill.cancel();
            debug!(?pid, "cli process disposed");
        }
    }

    /// Whether a turn is starting or running.
    #[must_use]
    pub fn is_process_running(&self) -> bool {
        !matches!(*self.lock(), SupervisorState::Idle)
    }

    fn begin(&self) -> Result<u64> {
        let mut state = self.lock();
        if !matches!(*state, SupervisorState::Idle) {
            return Err(AppError::AlreadyRunning);
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *state = SupervisorState::Starting { generation };
        Ok(generation)
    }

    async fn launch(
        &self,
        generation: u64,
        options: &ProcessOptions,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<()> {
        let turn = self.prepare(options).await?;

        if self.lock().generation() != Some(generation) {
            self.discard_artifact(&turn);
            return Err(AppError::Process("turn stopped before spawn".into()));
        }

        let mut child = match build_command(&turn).spawn() {
            Ok(child) => child,
            Err(err) => {
                let message = format!(
                    "failed to spawn {}: {err}",
                    turn.environment.executable.display()
                );
                self.discard_artifact(&turn);
                release(&self.state, generation);
                let _ = events.send(ProcessEvent::Error(message.clone())).await;
                let _ = events.send(ProcessEvent::Close(None)).await;
                return Err(AppError::Spawn(message));
            }
        };

        let pid = child.id();
        let kill = CancellationToken::new();
        if !self.promote(generation, pid, &kill) {
            debug!(?pid, "stopped while spawning, killing");
            kill.cancel();
        }

        let stdin = child.stdin.take();
        let message = user_message(options);
        let writer_events = events.clone();
        let writer = tokio::spawn(async move {
            let Some(stdin) = stdin else {
                return;
            };
            if let Err(err) = write_message(stdin, &message).await {
                warn!(%err, "failed to deliver user message");
                let _ = writer_events.send(ProcessEvent::Error(err.to_string())).await;
            }
        });

        let mut tasks = vec![writer];
        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(read_stdout(stdout, events.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(read_stderr(stderr, events.clone())));
        }

        info!(
            ?pid,
            executable = %turn.environment.executable.display(),
            mcp = turn.artifact.is_some(),
            "cli process started"
        );

        let driver = Driver {
            state: Arc::clone(&self.state),
            generation,
            pid,
            kill,
            tasks,
            drain: self.config.stream_drain_timeout(),
            events,
            artifact: turn.artifact.map(|built| built.path),
            artifact_janitor: Arc::clone(self.builder.janitor()),
            janitor: self.janitor.clone(),
            cwd: turn.environment.cwd,
        };
        tokio::spawn(driver.run(child).in_current_span());
        Ok(())
    }

    fn discard_artifact(&self, turn: &PreparedTurn) {
        if let Some(built) = &turn.artifact {
            self.builder.janitor().remove_artifact(&built.path);
        }
    }

    fn promote(&self, generation: u64, pid: Option<u32>, kill: &CancellationToken) -> bool {
        let mut state = self.lock();
        if !matches!(*state, SupervisorState::Starting { generation: g } if g == generation) {
            return false;
        }
        *state = SupervisorState::Running {
            generation,
            pid,
            kill: kill.clone(),
        };
        true
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Driver ──────────────────────────────────────────────────────

/// Owns a spawned child for the rest of its turn.
///
/// Exactly one driver exists per generation. It is the only place that
/// reaps the child and the only place that sends [`ProcessEvent::Close`],
/// which is why `Close` is always the turn's last event.
struct Driver {
    state: Arc<Mutex<SupervisorState>>,
    generation: u64,
    pid: Option<u32>,
    /// Cancelled by `stop_process`/`dispose` (or the grace timer) to kill.
    kill: CancellationToken,
    /// Stdin writer plus the stdout and stderr readers.
    tasks: Vec<JoinHandle<()>>,
    /// Bound on reader draining once the exit status is known.
    drain: Duration,
    events: mpsc::Sender<ProcessEvent>,
    /// This turn's artifact, removed before `Close`.
    artifact: Option<PathBuf>,
    artifact_janitor: Arc<ArtifactJanitor>,
    /// Scratch-file janitor, run after `Close` when configured.
    janitor: Option<Arc<ArtifactJanitor>>,
    cwd: PathBuf,
}

impl Driver {
    async fn run(self, mut child: Child) {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            () = self.kill.cancelled() => None,
        };
        let status = match exited {
            Some(status) => status,
            None => {
                if let Some(pid) = self.pid {
                    let _ = shutdown::force_kill(pid);
                }
                if let Err(err) = child.start_kill() {
                    debug!(%err, "child already exited");
                }
                child.wait().await
            }
        };
        // Ends any pending escalation timer.
        self.kill.cancel();

        let code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(%err, "failed to wait for cli process");
                None
            }
        };

        let mut tasks = self.tasks;
        let drained = tokio::time::timeout(self.drain, async {
            for task in &mut tasks {
                if let Err(err) = task.await {
                    warn!(%err, "stream task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            // Something left in the group still holds the pipes open.
            warn!(
                drain_ms = self.drain.as_millis(),
                "output still open after exit, cutting off"
            );
            if let Some(pid) = self.pid {
                let _ = shutdown::force_kill(pid);
            }
            for task in &tasks {
                task.abort();
            }
        }

        if let Some(path) = &self.artifact {
            self.artifact_janitor.remove_artifact(path);
        }

        release(&self.state, self.generation);
        info!(?code, "cli process closed");
        let _ = self.events.send(ProcessEvent::Close(code)).await;

        if let Some(janitor) = self.janitor {
            janitor.cleanup_recursive(&[self.cwd]).await;
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────

/// Return the slot to `Idle` if it still belongs to `generation`.
fn release(state: &Mutex<SupervisorState>, generation: u64) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.generation() == Some(generation) {
        *state = SupervisorState::Idle;
    }
}

fn build_command(turn: &PreparedTurn) -> Command {
    let environment = &turn.environment;

    let mut std_cmd = if environment.shell {
        let mut cmd = std::process::Command::new("cmd");
        cmd.arg("/C").arg(&environment.executable);
        cmd
    } else {
        std::process::Command::new(&environment.executable)
    };

    std_cmd
        .args(&turn.args)
        .current_dir(&environment.cwd)
        .env_clear()
        .envs(&environment.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so stop signals reach the servers the CLI spawns.
        std_cmd.process_group(0);
    }

    let mut cmd = Command::from(std_cmd);
    cmd.kill_on_drop(true);
    cmd
}
