//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agent_relay::diagnostics::MemorySink;
use agent_relay::mcp::artifact::{ArtifactBuilder, Platform};
use agent_relay::mcp::janitor::{ArtifactJanitor, GlobWorkspaceSearch};
use agent_relay::mcp::secrets::{SecretFuture, SecretInjector, SecretStore};
use agent_relay::AppError;

/// In-memory [`SecretStore`] that counts reads and can simulate an
/// unreachable keychain.
#[derive(Default)]
pub struct MemorySecretStore {
    value: Mutex<Option<String>>,
    fail: bool,
    reads: AtomicUsize,
}

impl MemorySecretStore {
    pub fn with_secret(secret: &str) -> Self {
        Self {
            value: Mutex::new(Some(secret.to_owned())),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self) -> SecretFuture<'_, Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail {
            Err(AppError::Secret("keychain locked".into()))
        } else {
            Ok(self.value.lock().unwrap().clone())
        };
        Box::pin(async move { result })
    }

    fn set(&self, value: &str) -> SecretFuture<'_, ()> {
        *self.value.lock().unwrap() = Some(value.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn delete(&self) -> SecretFuture<'_, ()> {
        *self.value.lock().unwrap() = None;
        Box::pin(async { Ok(()) })
    }
}

pub fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

/// Builder rooted at `root` with injection disabled.
pub fn builder(root: &Path, platform: Platform, vars: HashMap<String, String>) -> ArtifactBuilder {
    builder_with_injector(root, platform, vars, false, Arc::new(MemorySecretStore::default())).0
}

/// Builder rooted at `root` with the given injection settings.
pub fn builder_with_injector(
    root: &Path,
    platform: Platform,
    vars: HashMap<String, String>,
    inject: bool,
    store: Arc<MemorySecretStore>,
) -> (ArtifactBuilder, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let injector = SecretInjector::new(inject, store, sink.clone());
    let janitor = Arc::new(ArtifactJanitor::new(
        Arc::new(GlobWorkspaceSearch),
        sink.clone(),
    ));
    let builder = ArtifactBuilder::new(root.to_path_buf(), injector, janitor, sink.clone())
        .with_platform(platform)
        .with_env(vars);
    (builder, sink)
}
