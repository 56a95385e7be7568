//! Command-line arguments for one CLI turn.

use std::path::Path;

use crate::config::GlobalConfig;
use crate::models::options::ProcessOptions;

/// Flags present on every turn: print mode, JSON streaming in both
/// directions, verbose events, and auto-approved tool permissions.
pub const BASE_ARGS: &[&str] = &[
    "-p",
    "--output-format",
    "stream-json",
    "--input-format",
    "stream-json",
    "--verbose",
    "--dangerously-skip-permissions",
];

/// Separator between per-server prompt fragments.
pub const PROMPT_SEPARATOR: &str = "\n\n";

/// Build the argument vector.
///
/// `--resume` wins over `--session-id`. `--model` is only passed for
/// allow-listed models other than the default sentinel. Blank custom
/// instructions and an empty fragment list add nothing.
#[must_use]
pub fn build_args(
    config: &GlobalConfig,
    options: &ProcessOptions,
    mcp_config: Option<&Path>,
    prompt_fragments: &[&str],
) -> Vec<String> {
    let mut args: Vec<String> = BASE_ARGS.iter().map(|&a| a.to_owned()).collect();

    if let Some(path) = mcp_config {
        args.push("--mcp-config".into());
        args.push(path.to_string_lossy().into_owned());
    }

    match (
        non_blank(options.resume_session_id.as_deref()),
        non_blank(options.session_id.as_deref()),
    ) {
        (Some(resume), _) => {
            args.push("--resume".into());
            args.push(resume.to_owned());
        }
        (None, Some(session)) => {
            args.push("--session-id".into());
            args.push(session.to_owned());
        }
        (None, None) => {}
    }

    if let Some(model) = non_blank(options.model.as_deref()).filter(|m| config.accepts_model(m)) {
        args.push("--model".into());
        args.push(model.to_owned());
    }

    if let Some(instructions) = non_blank(options.custom_instructions.as_deref()) {
        args.push("--system-prompt".into());
        args.push(instructions.to_owned());
    }

    let fragments: Vec<&str> = prompt_fragments
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect();
    if !fragments.is_empty() {
        args.push("--append-system-prompt".into());
        args.push(fragments.join(PROMPT_SEPARATOR));
    }

    args
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
