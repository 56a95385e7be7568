//! Unit tests for CLI argument construction and the stdin user message.

use std::path::Path;

use agent_relay::config::GlobalConfig;
use agent_relay::models::options::{ImageAttachment, ProcessOptions};
use agent_relay::process::args::{build_args, BASE_ARGS};
use agent_relay::process::writer::{user_message, write_message};
use serde_json::json;

fn options() -> ProcessOptions {
    ProcessOptions::new("hello", "/tmp")
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[test]
fn base_flags_come_first() {
    let args = build_args(&GlobalConfig::default(), &options(), None, &[]);
    assert_eq!(args, BASE_ARGS.iter().map(|a| (*a).to_owned()).collect::<Vec<_>>());
    assert!(args.contains(&"--dangerously-skip-permissions".to_owned()));
    assert_eq!(value_after(&args, "--output-format"), Some("stream-json"));
    assert_eq!(value_after(&args, "--input-format"), Some("stream-json"));
}

#[test]
fn mcp_config_path_is_passed() {
    let args = build_args(
        &GlobalConfig::default(),
        &options(),
        Some(Path::new("/tmp/mcp-config-x/mcp-servers.json")),
        &[],
    );
    assert_eq!(
        value_after(&args, "--mcp-config"),
        Some("/tmp/mcp-config-x/mcp-servers.json")
    );
}

#[test]
fn resume_takes_precedence_over_session_id() {
    let opts = options().with_session_id("new-id").with_resume("old-id");
    let args = build_args(&GlobalConfig::default(), &opts, None, &[]);

    assert_eq!(value_after(&args, "--resume"), Some("old-id"));
    assert!(!args.contains(&"--session-id".to_owned()));

    let opts = options().with_session_id("new-id");
    let args = build_args(&GlobalConfig::default(), &opts, None, &[]);
    assert_eq!(value_after(&args, "--session-id"), Some("new-id"));
    assert!(!args.contains(&"--resume".to_owned()));
}

#[test]
fn model_flag_requires_allow_list_and_not_default() {
    let config = GlobalConfig::default();

    let args = build_args(&config, &options().with_model("sonnet"), None, &[]);
    assert_eq!(value_after(&args, "--model"), Some("sonnet"));

    let args = build_args(&config, &options().with_model("default"), None, &[]);
    assert!(!args.contains(&"--model".to_owned()));

    let args = build_args(&config, &options().with_model("gpt-unknown"), None, &[]);
    assert!(!args.contains(&"--model".to_owned()));
}

#[test]
fn custom_instructions_and_prompt_fragments() {
    let opts = options().with_custom_instructions("Be terse.");
    let args = build_args(
        &GlobalConfig::default(),
        &opts,
        None,
        &["Use docs for API questions.", "  ", "Prefer fs tools."],
    );

    assert_eq!(value_after(&args, "--system-prompt"), Some("Be terse."));
    assert_eq!(
        value_after(&args, "--append-system-prompt"),
        Some("Use docs for API questions.\n\nPrefer fs tools.")
    );
}

#[test]
fn blank_optional_values_add_nothing() {
    let opts = options()
        .with_custom_instructions("   ")
        .with_session_id("")
        .with_model("");
    let args = build_args(&GlobalConfig::default(), &opts, None, &["", " "]);
    assert_eq!(args.len(), BASE_ARGS.len());
}

#[test]
fn user_message_has_text_then_images() {
    let opts = options()
        .with_image(ImageAttachment::png("iVBOR"))
        .with_image(ImageAttachment {
            media_type: "image/jpeg".into(),
            data: "/9j/".into(),
        });

    assert_eq!(
        user_message(&opts),
        json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [
                    { "type": "text", "text": "hello" },
                    { "type": "image", "source": { "type": "base64", "media_type": "image/png", "data": "iVBOR" } },
                    { "type": "image", "source": { "type": "base64", "media_type": "image/jpeg", "data": "/9j/" } }
                ]
            }
        })
    );
}

#[tokio::test]
async fn message_is_written_as_one_line() {
    let mut sink: Vec<u8> = Vec::new();
    write_message(&mut sink, &user_message(&options()))
        .await
        .expect("write");

    let text = String::from_utf8(sink).expect("utf8");
    assert!(text.ends_with('\n'));
    assert_eq!(text.matches('\n').count(), 1);
    let parsed: serde_json::Value = serde_json::from_str(text.trim_end()).expect("json");
    assert_eq!(parsed["message"]["content"][0]["text"], "hello");
}
