//! Unit tests for `SecretInjector` gating and targeting.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_relay::diagnostics::{Component, MemorySink};
use agent_relay::mcp::artifact::WireServer;
use agent_relay::mcp::secrets::{is_injection_target, SecretInjector, INJECTED_ENV_KEY};

use super::test_helpers::MemorySecretStore;

fn stdio(command: &str, args: &[&str]) -> WireServer {
    WireServer {
        command: Some(command.to_owned()),
        args: args.iter().map(|a| (*a).to_owned()).collect(),
        ..WireServer::default()
    }
}

fn servers() -> BTreeMap<String, WireServer> {
    let mut map = BTreeMap::new();
    map.insert("Gemini-Search".to_owned(), stdio("node", &["server.js"]));
    map.insert(
        "helper".to_owned(),
        stdio("npx", &["-y", "@google/GEMINI-mcp"]),
    );
    map.insert("filesystem".to_owned(), stdio("npx", &["-y", "fs-server"]));
    map
}

fn injected_key(server: &WireServer) -> Option<&str> {
    server
        .env
        .as_ref()
        .and_then(|env| env.get(INJECTED_ENV_KEY))
        .map(String::as_str)
}

#[test]
fn targets_match_name_or_args_case_insensitively() {
    assert!(is_injection_target("my-GEMINI", &[]));
    assert!(is_injection_target("x", &["--model".into(), "Gemini-Pro".into()]));
    assert!(!is_injection_target("search", &["-y".into(), "pkg".into()]));
}

#[tokio::test]
async fn disabled_flag_never_consults_store_or_injects() {
    let store = Arc::new(MemorySecretStore::with_secret("s3cret"));
    let injector = SecretInjector::new(false, store.clone(), Arc::new(MemorySink::new()));

    let mut map = servers();
    let injected = injector.inject_if_needed(&mut map).await;

    assert!(injected.is_empty());
    assert_eq!(store.reads(), 0, "store must not be read when disabled");
    assert!(map.values().all(|s| injected_key(s).is_none()));
}

#[tokio::test]
async fn enabled_with_secret_injects_matching_servers_only() {
    let store = Arc::new(MemorySecretStore::with_secret("s3cret"));
    let injector = SecretInjector::new(true, store, Arc::new(MemorySink::new()));

    let mut map = servers();
    let injected = injector.inject_if_needed(&mut map).await;

    assert_eq!(injected, vec!["Gemini-Search", "helper"]);
    assert_eq!(injected_key(&map["Gemini-Search"]), Some("s3cret"));
    assert_eq!(injected_key(&map["helper"]), Some("s3cret"));
    assert!(map["filesystem"].env.is_none());
}

#[tokio::test]
async fn placeholder_is_overwritten_and_other_keys_kept() {
    let store = Arc::new(MemorySecretStore::with_secret("real"));
    let injector = SecretInjector::new(true, store, Arc::new(MemorySink::new()));

    let mut server = stdio("gemini-cli", &[]);
    server.env = Some(BTreeMap::from([
        (INJECTED_ENV_KEY.to_owned(), "${GEMINI_API_KEY}".to_owned()),
        ("DEBUG".to_owned(), "1".to_owned()),
    ]));
    let mut map = BTreeMap::from([("gemini".to_owned(), server)]);

    injector.inject_if_needed(&mut map).await;

    let env = map["gemini"].env.as_ref().expect("env");
    assert_eq!(env.get(INJECTED_ENV_KEY).map(String::as_str), Some("real"));
    assert_eq!(env.get("DEBUG").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn missing_secret_skips_injection() {
    let store = Arc::new(MemorySecretStore::default());
    let injector = SecretInjector::new(true, store.clone(), Arc::new(MemorySink::new()));

    let mut map = servers();
    assert!(injector.inject_if_needed(&mut map).await.is_empty());
    assert_eq!(store.reads(), 1);
    assert!(map.values().all(|s| s.env.is_none()));
}

#[tokio::test]
async fn store_failure_is_swallowed_and_reported() {
    let sink = Arc::new(MemorySink::new());
    let injector = SecretInjector::new(
        true,
        Arc::new(MemorySecretStore::failing()),
        sink.clone(),
    );

    let mut map = servers();
    assert!(injector.inject_if_needed(&mut map).await.is_empty());
    assert!(map.values().all(|s| s.env.is_none()));

    let warnings = sink.warnings_for(Component::Secrets);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("keychain locked"));
}
