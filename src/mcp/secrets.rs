//! Secure credential storage and best-effort API key injection.
//!
//! The injector decides per turn whether the stored API key should be
//! copied into the environment of matching servers. A server matches when
//! its name contains [`INJECTION_MARKER`] (case-insensitive) or its joined,
//! lower-cased arguments do. Every storage failure is logged and treated as
//! "skip injection"; injection never fails a turn.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SecretsConfig;
use crate::diagnostics::{Component, Diagnostic, DiagnosticSink};
use crate::mcp::artifact::WireServer;
use crate::{AppError, Result};

/// Marker identifying servers that receive the API key.
pub const INJECTION_MARKER: &str = "gemini";

/// Environment key the API key is written to.
pub const INJECTED_ENV_KEY: &str = "GEMINI_API_KEY";

/// Boxed future returned by [`SecretStore`] methods.
pub type SecretFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Secure storage for one named credential.
pub trait SecretStore: Send + Sync {
    /// Read the credential; `Ok(None)` when nothing is stored.
    fn get(&self) -> SecretFuture<'_, Option<String>>;

    /// Store or replace the credential.
    fn set(&self, value: &str) -> SecretFuture<'_, ()>;

    /// Remove the credential. Removing a missing credential succeeds.
    fn delete(&self) -> SecretFuture<'_, ()>;
}

/// [`SecretStore`] backed by the OS keychain.
///
/// `keyring` performs blocking I/O, so every call runs on
/// `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
    account: String,
}

impl KeyringSecretStore {
    /// Store for `account` under keychain `service`.
    #[must_use]
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    /// Store configured by `[secrets]`.
    #[must_use]
    pub fn from_config(config: &SecretsConfig) -> Self {
        Self::new(config.service.clone(), config.account.clone())
    }

    async fn with_entry<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> std::result::Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || keyring::Entry::new(&service, &account).and_then(op))
            .await
            .map_err(|err| AppError::Secret(format!("keychain task panicked: {err}")))?
            .map_err(|err| AppError::Secret(format!("keychain error: {err}")))
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self) -> SecretFuture<'_, Option<String>> {
        Box::pin(async move {
            let result = self
                .with_entry(|entry| match entry.get_password() {
                    Ok(value) => Ok(Some(value)),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(err) => Err(err),
                })
                .await?;
            Ok(result.filter(|v| !v.is_empty()))
        })
    }

    fn set(&self, value: &str) -> SecretFuture<'_, ()> {
        let value = value.to_owned();
        Box::pin(async move { self.with_entry(move |entry| entry.set_password(&value)).await })
    }

    fn delete(&self) -> SecretFuture<'_, ()> {
        Box::pin(async move {
            self.with_entry(|entry| match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(err) => Err(err),
            })
            .await
        })
    }
}

/// Whether a server qualifies for injection.
#[must_use]
pub fn is_injection_target(name: &str, args: &[String]) -> bool {
    name.to_lowercase().contains(INJECTION_MARKER)
        || args.join(" ").to_lowercase().contains(INJECTION_MARKER)
}

/// Copies the stored API key into matching servers' environments.
pub struct SecretInjector {
    enabled: bool,
    store: Arc<dyn SecretStore>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl SecretInjector {
    /// Injector gated by `enabled`, reading from `store`.
    #[must_use]
    pub fn new(
        enabled: bool,
        store: Arc<dyn SecretStore>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            enabled,
            store,
            diagnostics,
        }
    }

    /// Secret to inject this turn, or `None` when injection is off, nothing
    /// is stored, or the store is unreachable.
    ///
    /// The store is not consulted at all when the feature flag is off.
    pub async fn secret_to_inject(&self) -> Option<String> {
        if !self.enabled {
            debug!("secret injection disabled");
            return None;
        }

        match self.store.get().await {
            Ok(Some(secret)) => Some(secret),
            Ok(None) => {
                debug!("no stored secret, skipping injection");
                None
            }
            Err(err) => {
                warn!(%err, "secret store unavailable, skipping injection");
                self.diagnostics.record(Diagnostic::warning(
                    Component::Secrets,
                    format!("secret store unavailable, injection skipped: {err}"),
                ));
                None
            }
        }
    }

    /// Inject the API key into every target in `servers`.
    ///
    /// The target's `env` is created when absent and the key is overwritten
    /// when present. Returns the names that received the secret.
    pub async fn inject_if_needed(
        &self,
        servers: &mut BTreeMap<String, WireServer>,
    ) -> Vec<String> {
        let Some(secret) = self.secret_to_inject().await else {
            return Vec::new();
        };

        let mut injected = Vec::new();
        for (name, server) in servers.iter_mut() {
            if !is_injection_target(name, &server.args) {
                continue;
            }
            server
                .env
                .get_or_insert_with(BTreeMap::new)
                .insert(INJECTED_ENV_KEY.to_owned(), secret.clone());
            injected.push(name.clone());
        }

        if !injected.is_empty() {
            self.diagnostics.record(
                Diagnostic::info(Component::Secrets, "api key injected")
                    .with_subject(injected.join(",")),
            );
        }
        injected
    }
}
