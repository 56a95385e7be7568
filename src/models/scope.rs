//! Configuration scopes and per-scope values.

use serde::{Deserialize, Serialize};

use super::server::RawServerEntry;

/// A configuration source, ordered by ascending precedence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// User-wide settings.
    Global,
    /// Settings of the open workspace.
    Workspace,
    /// Settings of a single folder inside the workspace.
    WorkspaceFolder,
}

impl ScopeKind {
    /// All scopes from lowest to highest precedence.
    pub const ASCENDING: [Self; 3] = [Self::Global, Self::Workspace, Self::WorkspaceFolder];
}

/// One value as seen at every scope, like an editor's settings inspector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedValue<T> {
    /// Value used when no scope sets one.
    pub default_value: Option<T>,
    /// Global scope value.
    pub global: Option<T>,
    /// Workspace scope value.
    pub workspace: Option<T>,
    /// Workspace-folder scope value.
    pub workspace_folder: Option<T>,
}

impl<T> Default for ScopedValue<T> {
    fn default() -> Self {
        Self {
            default_value: None,
            global: None,
            workspace: None,
            workspace_folder: None,
        }
    }
}

impl<T> ScopedValue<T> {
    /// A value with only a default.
    #[must_use]
    pub fn with_default(default_value: T) -> Self {
        Self {
            default_value: Some(default_value),
            ..Self::default()
        }
    }

    /// Value set at `scope`, if any.
    #[must_use]
    pub fn get(&self, scope: ScopeKind) -> Option<&T> {
        match scope {
            ScopeKind::Global => self.global.as_ref(),
            ScopeKind::Workspace => self.workspace.as_ref(),
            ScopeKind::WorkspaceFolder => self.workspace_folder.as_ref(),
        }
    }

    /// Replace the value at `scope`.
    pub fn set(&mut self, scope: ScopeKind, value: Option<T>) {
        match scope {
            ScopeKind::Global => self.global = value,
            ScopeKind::Workspace => self.workspace = value,
            ScopeKind::WorkspaceFolder => self.workspace_folder = value,
        }
    }

    /// Builder form of [`ScopedValue::set`].
    #[must_use]
    pub fn at(mut self, scope: ScopeKind, value: T) -> Self {
        self.set(scope, Some(value));
        self
    }

    /// Most specific explicit value, falling back to the default.
    #[must_use]
    pub fn effective(&self) -> Option<&T> {
        ScopeKind::ASCENDING
            .iter()
            .rev()
            .find_map(|scope| self.get(*scope))
            .or(self.default_value.as_ref())
    }
}

/// Server entries contributed by one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeLayer {
    /// Which scope the entries come from.
    pub kind: ScopeKind,
    /// Entries in declaration order.
    pub entries: Vec<RawServerEntry>,
}

impl ScopeLayer {
    /// Create a layer.
    #[must_use]
    pub fn new(kind: ScopeKind, entries: Vec<RawServerEntry>) -> Self {
        Self { kind, entries }
    }
}
