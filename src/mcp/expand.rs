//! Environment variable expansion for server commands, arguments, and env.
//!
//! Recognised forms:
//!
//! | Input        | Result                                   |
//! |--------------|------------------------------------------|
//! | `${NAME}`    | value of `NAME`                          |
//! | `$NAME`      | value of `NAME`                          |
//! | `\${NAME}`   | literal `${NAME}`, never expanded        |
//!
//! Unknown names are left untouched, except `HOME` and `USERPROFILE` which
//! fall back to the current user's home directory.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap_or_else(|_| unreachable!("variable token pattern is a valid regex"))
});

/// Expand `${NAME}` and `$NAME` in `input` against `env`.
///
/// Single pass: text produced by unescaping or substitution is never
/// re-scanned.
#[must_use]
pub fn expand(input: &str, env: &HashMap<String, String>) -> String {
    if !input.contains('$') {
        return input.to_owned();
    }

    TOKEN
        .replace_all(input, |caps: &Captures<'_>| {
            if let Some(escaped) = caps.get(1) {
                return format!("${{{}}}", escaped.as_str());
            }
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            lookup(name, env).unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

fn lookup(name: &str, env: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = env.get(name) {
        return Some(value.clone());
    }
    match name {
        "HOME" | "USERPROFILE" => dirs::home_dir().map(|p| p.to_string_lossy().into_owned()),
        _ => None,
    }
}
