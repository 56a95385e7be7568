//! Shared test helpers for supervisor-level integration tests.
//!
//! Provides a fake CLI script, a fixed environment resolver, an in-memory
//! settings store and a supervisor factory so individual test modules can
//! focus on behaviour rather than wiring.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_relay::config::GlobalConfig;
use agent_relay::config_store::{ConfigStore, StoreFuture};
use agent_relay::diagnostics::MemorySink;
use agent_relay::mcp::artifact::{ArtifactBuilder, Platform};
use agent_relay::mcp::janitor::{ArtifactJanitor, GlobWorkspaceSearch};
use agent_relay::mcp::secrets::{SecretFuture, SecretInjector, SecretStore};
use agent_relay::models::options::ExecutionEnvironment;
use agent_relay::models::scope::{ScopeKind, ScopedValue};
use agent_relay::platform::{EnvironmentFuture, EnvironmentResolver};
use agent_relay::process::{ProcessEvent, ProcessSupervisor};
use serde_json::Value;
use tokio::sync::mpsc;

/// Config with a short stop grace period.
pub fn test_config() -> GlobalConfig {
    GlobalConfig::from_toml_str(
        r#"
cli_command = "fake-cli"

[process]
stop_grace_seconds = 1
event_buffer = 64
stream_drain_millis = 500

[janitor]
scratch_cleanup_on_start = false
"#,
    )
    .expect("valid test config")
}

/// Resolver that always returns the same executable and a minimal
/// environment, without touching `PATH`.
pub struct StaticEnvironmentResolver {
    executable: PathBuf,
}

impl StaticEnvironmentResolver {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl EnvironmentResolver for StaticEnvironmentResolver {
    fn resolve<'a>(&'a self, cwd: &'a Path) -> EnvironmentFuture<'a> {
        let env: HashMap<String, String> = [("PATH", "/usr/bin:/bin"), ("HOME", "/tmp")]
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let environment = ExecutionEnvironment {
            executable: self.executable.clone(),
            cwd: cwd.to_path_buf(),
            env,
            shell: false,
        };
        Box::pin(async move { Ok(environment) })
    }
}

/// Settings store held in memory.
#[derive(Default)]
pub struct MemoryConfigStore {
    servers: Mutex<ScopedValue<Value>>,
    enabled: Mutex<ScopedValue<bool>>,
}

impl MemoryConfigStore {
    /// Store with `servers` at the global scope and the feature flag set.
    pub fn with_global(servers: Value, enabled: bool) -> Self {
        Self {
            servers: Mutex::new(ScopedValue::default().at(ScopeKind::Global, servers)),
            enabled: Mutex::new(ScopedValue::with_default(false).at(ScopeKind::Global, enabled)),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn inspect_servers(&self) -> StoreFuture<'_, ScopedValue<Value>> {
        let value = self.servers.lock().unwrap().clone();
        Box::pin(async move { Ok(value) })
    }

    fn inspect_enabled(&self) -> StoreFuture<'_, ScopedValue<bool>> {
        let value = self.enabled.lock().unwrap().clone();
        Box::pin(async move { Ok(value) })
    }

    fn write_servers(&self, scope: ScopeKind, servers: Value) -> StoreFuture<'_, ()> {
        self.servers.lock().unwrap().set(scope, Some(servers));
        Box::pin(async { Ok(()) })
    }
}

/// Secret store that never holds a credential.
pub struct EmptySecretStore;

impl SecretStore for EmptySecretStore {
    fn get(&self) -> SecretFuture<'_, Option<String>> {
        Box::pin(async { Ok(None) })
    }

    fn set(&self, _value: &str) -> SecretFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn delete(&self) -> SecretFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Write an executable `/bin/sh` script named `fake-cli` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-cli");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// Everything a test needs to drive one supervisor.
pub struct Harness {
    pub supervisor: ProcessSupervisor,
    pub diagnostics: Arc<MemorySink>,
    pub artifact_root: PathBuf,
}

/// Build a supervisor around `environment` and `store`, writing artifacts
/// under `artifact_root`.
pub fn harness(
    environment: Arc<dyn EnvironmentResolver>,
    store: Arc<dyn ConfigStore>,
    artifact_root: &Path,
) -> Harness {
    let diagnostics = Arc::new(MemorySink::new());
    let janitor = Arc::new(ArtifactJanitor::new(
        Arc::new(GlobWorkspaceSearch),
        diagnostics.clone(),
    ));
    let injector = SecretInjector::new(false, Arc::new(EmptySecretStore), diagnostics.clone());
    let builder = ArtifactBuilder::new(
        artifact_root.to_path_buf(),
        injector,
        janitor,
        diagnostics.clone(),
    )
    .with_platform(Platform::Unix);

    let supervisor = ProcessSupervisor::new(
        Arc::new(test_config()),
        environment,
        store,
        builder,
        diagnostics.clone(),
    );
    Harness {
        supervisor,
        diagnostics,
        artifact_root: artifact_root.to_path_buf(),
    }
}

/// Receive events until `Close`, failing the test after `limit`.
pub async fn collect_until_close(
    rx: &mut mpsc::Receiver<ProcessEvent>,
    limit: Duration,
) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(limit, async {
        while let Some(event) = rx.recv().await {
            let done = matches!(event, ProcessEvent::Close(_));
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("turn closed in time");
    events
}
