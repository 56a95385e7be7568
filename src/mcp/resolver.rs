//! Scope merging for server entries and the MCP enabled flag.
//!
//! Layers are applied in ascending precedence
//! (`Global → Workspace → WorkspaceFolder`). A later layer's entry fully
//! replaces an earlier entry with the same name. Disablement is decided by
//! the winning entry only, after all layers are applied, and winners are
//! then validated into [`ServerEntry`] values.

use std::sync::Arc;

use serde_json::Value;

use crate::diagnostics::{Component, Diagnostic, DiagnosticSink};
use crate::models::scope::{ScopeKind, ScopeLayer, ScopedValue};
use crate::models::server::{MergedServerSet, RawServerEntry, ServerEntry};

/// Merges scoped server definitions.
pub struct ScopeResolver {
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ScopeResolver {
    /// Create a resolver reporting to `diagnostics`.
    #[must_use]
    pub fn new(diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self { diagnostics }
    }

    /// Build one layer from the raw settings value of a scope.
    ///
    /// Accepts a list of entry objects, or a single legacy entry object
    /// which is treated as a one-element list. Items that are not objects
    /// or do not deserialize are skipped with a warning.
    #[must_use]
    pub fn parse_layer(&self, kind: ScopeKind, value: &Value) -> ScopeLayer {
        let items: Vec<&Value> = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![value],
            other => {
                self.warn(
                    format!("{kind:?} servers value must be a list, got {}", type_name(other)),
                    None,
                );
                Vec::new()
            }
        };

        let entries = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                match serde_json::from_value::<RawServerEntry>(item.clone()) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        self.warn(
                            format!("{kind:?} server #{index} is malformed: {err}"),
                            None,
                        );
                        None
                    }
                }
            })
            .collect();

        ScopeLayer::new(kind, entries)
    }

    /// Build every present layer from an inspected settings value.
    #[must_use]
    pub fn layers_from(&self, scoped: &ScopedValue<Value>) -> Vec<ScopeLayer> {
        ScopeKind::ASCENDING
            .iter()
            .filter_map(|kind| scoped.get(*kind).map(|value| self.parse_layer(*kind, value)))
            .collect()
    }

    /// Merge `layers` into the enabled, validated server set.
    ///
    /// Input order does not matter; layers are applied by precedence.
    #[must_use]
    pub fn resolve_servers(&self, layers: &[ScopeLayer]) -> MergedServerSet {
        let mut ordered: Vec<&ScopeLayer> = layers.iter().collect();
        ordered.sort_by_key(|layer| layer.kind);

        let mut winners: Vec<(String, &RawServerEntry)> = Vec::new();
        for layer in ordered {
            for entry in &layer.entries {
                let Some(name) = entry.key() else {
                    self.warn(format!("{:?} server entry without a name skipped", layer.kind), None);
                    continue;
                };
                match winners.iter_mut().find(|(n, _)| n == name) {
                    Some(slot) => slot.1 = entry,
                    None => winners.push((name.to_owned(), entry)),
                }
            }
        }

        winners
            .into_iter()
            .filter(|(_, entry)| !entry.disabled)
            .filter_map(|(name, entry)| match ServerEntry::try_from_raw(entry.clone()) {
                Ok(server) => Some(server),
                Err(err) => {
                    self.warn(format!("server dropped: {err}"), Some(&name));
                    None
                }
            })
            .collect()
    }

    /// Resolve the enabled flag: most specific explicit value wins,
    /// then the default, then `false`.
    #[must_use]
    pub fn resolve_enabled(scoped: &ScopedValue<bool>) -> bool {
        scoped.effective().copied().unwrap_or(false)
    }

    fn warn(&self, message: String, subject: Option<&str>) {
        let mut entry = Diagnostic::warning(Component::Resolver, message);
        if let Some(subject) = subject {
            entry = entry.with_subject(subject);
        }
        self.diagnostics.record(entry);
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
