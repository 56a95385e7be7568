//! Unit tests for the launch environment captured from this process.

use std::ffi::OsString;

use agent_relay::platform::unicode_env;

#[test]
fn unicode_entries_are_kept() {
    let env = unicode_env(vec![
        (OsString::from("HOME"), OsString::from("/home/dev")),
        (OsString::from("LANG"), OsString::from("C.UTF-8")),
    ]);
    assert_eq!(env.len(), 2);
    assert_eq!(env.get("HOME").map(String::as_str), Some("/home/dev"));
}

#[cfg(unix)]
mod non_unicode {
    use std::ffi::{OsStr, OsString};
    use std::os::unix::ffi::OsStrExt;
    use std::sync::Arc;

    use agent_relay::diagnostics::MemorySink;
    use agent_relay::mcp::artifact::ArtifactBuilder;
    use agent_relay::mcp::janitor::{ArtifactJanitor, GlobWorkspaceSearch};
    use agent_relay::mcp::secrets::SecretInjector;
    use agent_relay::platform::{
        process_env, unicode_env, EnvironmentResolver, SystemEnvironmentResolver,
    };
    use serial_test::serial;

    use crate::unit::test_helpers::MemorySecretStore;

    const BAD_KEY: &str = "AGENT_RELAY_TEST_NON_UNICODE";

    struct BadVar;

    impl BadVar {
        fn set() -> Self {
            std::env::set_var(BAD_KEY, OsStr::from_bytes(b"\xff\xfe"));
            Self
        }
    }

    impl Drop for BadVar {
        fn drop(&mut self) {
            std::env::remove_var(BAD_KEY);
        }
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let env = unicode_env(vec![
            (OsString::from("GOOD"), OsString::from("yes")),
            (OsString::from("BAD_VALUE"), OsStr::from_bytes(b"\xff").to_owned()),
            (OsStr::from_bytes(b"BAD\xffKEY").to_owned(), OsString::from("x")),
        ]);
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("GOOD").map(String::as_str), Some("yes"));
    }

    #[test]
    #[serial]
    fn process_env_skips_non_unicode_variable() {
        let _guard = BadVar::set();
        std::env::set_var("AGENT_RELAY_TEST_OK", "ok");

        let env = process_env();
        assert!(!env.contains_key(BAD_KEY));
        assert_eq!(env.get("AGENT_RELAY_TEST_OK").map(String::as_str), Some("ok"));

        std::env::remove_var("AGENT_RELAY_TEST_OK");
    }

    #[test]
    #[serial]
    fn artifact_builder_starts_with_non_unicode_variable() {
        let _guard = BadVar::set();
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = Arc::new(MemorySink::new());
        let injector = SecretInjector::new(false, Arc::new(MemorySecretStore::default()), sink.clone());
        let janitor = Arc::new(ArtifactJanitor::new(Arc::new(GlobWorkspaceSearch), sink.clone()));

        let builder = ArtifactBuilder::new(temp.path().to_path_buf(), injector, janitor, sink);
        assert_eq!(builder.root(), temp.path());
    }

    #[tokio::test]
    #[serial]
    async fn environment_resolves_with_non_unicode_variable() {
        let _guard = BadVar::set();
        let temp = tempfile::tempdir().expect("tempdir");

        let resolved = SystemEnvironmentResolver::new("sh", None)
            .resolve(temp.path())
            .await
            .expect("resolve");
        assert!(!resolved.env.contains_key(BAD_KEY));
        assert_eq!(resolved.cwd, temp.path());
    }
}
