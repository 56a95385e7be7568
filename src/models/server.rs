//! Server entry model: raw scope entries, the validated tagged union, and
//! the merged name-keyed set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Transport declared by a server entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned child process speaking over stdio.
    Stdio,
    /// Streamable HTTP endpoint.
    Http,
    /// Server-sent events endpoint.
    Sse,
}

impl TransportKind {
    /// Parse a user-supplied transport label, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for unknown labels.
    pub fn parse(label: &str) -> Result<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" | "streamable-http" | "streamablehttp" => Ok(Self::Http),
            "sse" => Ok(Self::Sse),
            other => Err(AppError::Config(format!("unknown transport `{other}`"))),
        }
    }
}

/// Arguments as users write them: a list, or one command-line string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ArgsSpec {
    /// Pre-split argument list.
    List(Vec<String>),
    /// Single whitespace-separated string.
    Line(String),
}

impl Default for ArgsSpec {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl ArgsSpec {
    /// Rejoin on spaces and re-split on whitespace.
    ///
    /// Lists are rejoined too, which repairs arguments that were split
    /// incorrectly (e.g. `["-y pkg"]` becomes `["-y", "pkg"]`).
    #[must_use]
    pub fn normalized(&self) -> Vec<String> {
        let joined = match self {
            Self::List(items) => items.join(" "),
            Self::Line(line) => line.clone(),
        };
        joined.split_whitespace().map(str::to_owned).collect()
    }
}

/// Environment as users write it: a mapping, or a string holding either a
/// JSON object or whitespace-separated `KEY=VALUE` pairs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EnvSpec {
    /// Direct mapping.
    Map(serde_json::Map<String, Value>),
    /// Encoded string form.
    Text(String),
}

impl EnvSpec {
    /// Decode into ordered `(key, value)` pairs.
    ///
    /// JSON text that fails to parse falls back to `KEY=VALUE` parsing;
    /// tokens without `=` or with an empty key are ignored.
    #[must_use]
    pub fn pairs(&self) -> Vec<(String, Value)> {
        match self {
            Self::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.starts_with('{') {
                    if let Ok(serde_json::Value::Object(map)) =
                        serde_json::from_str::<Value>(trimmed)
                    {
                        return map.into_iter().collect();
                    }
                }
                trimmed
                    .split_whitespace()
                    .filter_map(|token| token.split_once('='))
                    .filter(|(key, _)| !key.is_empty())
                    .map(|(key, value)| (key.to_owned(), Value::String(value.to_owned())))
                    .collect()
            }
        }
    }
}

/// A server entry exactly as read from one configuration scope.
///
/// Only `name` and `disabled` matter while merging; the transport fields
/// are validated after the winning entry per name is known.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawServerEntry {
    /// Unique key within a scope.
    #[serde(default)]
    pub name: Option<String>,
    /// Declared transport (`stdio`, `http`, `sse`).
    #[serde(default, rename = "type", alias = "transport")]
    pub transport: Option<String>,
    /// Executable for stdio servers.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for stdio servers.
    #[serde(default)]
    pub args: Option<ArgsSpec>,
    /// Environment for stdio servers.
    #[serde(default)]
    pub env: Option<EnvSpec>,
    /// Endpoint for http/sse servers.
    #[serde(default)]
    pub url: Option<String>,
    /// Request headers for http/sse servers.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    /// Excludes the entry when set on the winning scope.
    #[serde(default)]
    pub disabled: bool,
    /// System prompt fragment contributed by this server.
    #[serde(default, alias = "systemPrompt")]
    pub prompt: Option<String>,
}

impl RawServerEntry {
    /// Trimmed, non-empty name if present.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

/// Transport-specific part of a validated entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerTransport {
    /// Spawned over stdio.
    Stdio {
        /// Unexpanded command.
        command: String,
        /// Unexpanded arguments.
        args: ArgsSpec,
        /// Unexpanded environment.
        env: Option<EnvSpec>,
    },
    /// Streamable HTTP.
    Http {
        /// Endpoint URL.
        url: String,
        /// Request headers.
        headers: BTreeMap<String, String>,
    },
    /// Server-sent events.
    Sse {
        /// Endpoint URL.
        url: String,
        /// Request headers.
        headers: BTreeMap<String, String>,
    },
}

impl ServerTransport {
    /// Transport discriminant.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Http { .. } => TransportKind::Http,
            Self::Sse { .. } => TransportKind::Sse,
        }
    }
}

/// A validated server definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEntry {
    /// Unique, non-empty name.
    pub name: String,
    /// Transport and its required fields.
    pub transport: ServerTransport,
    /// Optional system prompt fragment.
    pub prompt: Option<String>,
}

impl ServerEntry {
    /// Create a stdio entry.
    #[must_use]
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Stdio {
                command: command.into(),
                args: ArgsSpec::List(args),
                env: None,
            },
            prompt: None,
        }
    }

    /// Create an HTTP entry.
    #[must_use]
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Http {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            prompt: None,
        }
    }

    /// Validate a raw entry into the tagged union.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the name is missing, the transport
    /// is unknown or ambiguous, or the transport's required field is absent.
    pub fn try_from_raw(raw: RawServerEntry) -> Result<Self> {
        let name = raw
            .key()
            .ok_or_else(|| AppError::Config("server entry has no name".into()))?
            .to_owned();

        let command = raw.command.filter(|c| !c.trim().is_empty());
        let url = raw.url.filter(|u| !u.trim().is_empty());

        let kind = match raw.transport.as_deref() {
            Some(label) => TransportKind::parse(label)?,
            None => match (&command, &url) {
                (Some(_), None) => TransportKind::Stdio,
                (None, Some(_)) => TransportKind::Http,
                (Some(_), Some(_)) => {
                    return Err(AppError::Config(format!(
                        "server `{name}` declares both command and url without a type"
                    )))
                }
                (None, None) => {
                    return Err(AppError::Config(format!(
                        "server `{name}` has neither command nor url"
                    )))
                }
            },
        };

        let transport = match kind {
            TransportKind::Stdio => ServerTransport::Stdio {
                command: command.ok_or_else(|| {
                    AppError::Config(format!("stdio server `{name}` is missing `command`"))
                })?,
                args: raw.args.unwrap_or_default(),
                env: raw.env,
            },
            TransportKind::Http | TransportKind::Sse => {
                let url = url.ok_or_else(|| {
                    AppError::Config(format!("{kind:?} server `{name}` is missing `url`"))
                })?;
                let headers = raw.headers.unwrap_or_default();
                if kind == TransportKind::Http {
                    ServerTransport::Http { url, headers }
                } else {
                    ServerTransport::Sse { url, headers }
                }
            }
        };

        Ok(Self {
            name,
            transport,
            prompt: raw.prompt.filter(|p| !p.trim().is_empty()),
        })
    }
}

/// Enabled servers keyed by name, kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedServerSet {
    entries: Vec<ServerEntry>,
}

impl MergedServerSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`, replacing an existing entry of the same name in place.
    pub fn insert(&mut self, entry: ServerEntry) {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            *slot = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Look up an entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServerEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Names in first-seen order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Iterate entries in first-seen order.
    pub fn iter(&self) -> std::slice::Iter<'_, ServerEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prompt fragments of all entries that declare one, in order.
    #[must_use]
    pub fn prompt_fragments(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| e.prompt.as_deref())
            .collect()
    }
}

impl FromIterator<ServerEntry> for MergedServerSet {
    fn from_iter<I: IntoIterator<Item = ServerEntry>>(iter: I) -> Self {
        let mut set = Self::new();
        for entry in iter {
            set.insert(entry);
        }
        set
    }
}

impl<'a> IntoIterator for &'a MergedServerSet {
    type Item = &'a ServerEntry;
    type IntoIter = std::slice::Iter<'a, ServerEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
