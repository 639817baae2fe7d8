use std::time::Duration;

use assert_matches::assert_matches;

use kira_clade::config::{Config, ConfigLoader, EnvOverrides};
use kira_clade::error::KiraError;

#[test]
fn parse_full_config() {
    let config: Config = serde_json::from_str(
        r#"{
            "schema_version": 1,
            "ncbi": {"base_url": "http://localhost:9999/eutils/", "email": "lab@example.org", "tool": "cladescan"},
            "throttle": {"requests_per_window": 5, "window_ms": 2000, "max_in_flight": 2, "max_attempts": 3, "base_delay_ms": 250, "call_timeout_ms": 10000},
            "session": {"timeout_secs": 600, "max_sessions": 4},
            "server": {"bind": "0.0.0.0:9000"},
            "archive": {"combined_fasta": true}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config, &EnvOverrides::default()).unwrap();
    assert_eq!(resolved.ncbi.base_url, "http://localhost:9999/eutils");
    assert_eq!(resolved.ncbi.email.as_deref(), Some("lab@example.org"));
    assert_eq!(resolved.ncbi.tool, "cladescan");
    assert_eq!(resolved.throttle.requests_per_window, 5);
    assert_eq!(resolved.throttle.window, Duration::from_secs(2));
    assert_eq!(resolved.throttle.max_in_flight, 2);
    assert_eq!(resolved.throttle.base_delay, Duration::from_millis(250));
    assert_eq!(resolved.session_timeout, Some(Duration::from_secs(600)));
    assert_eq!(resolved.max_sessions, 4);
    assert_eq!(resolved.bind.port(), 9000);
    assert!(resolved.combined_fasta);
}

#[test]
fn env_overrides_file_credentials() {
    let config: Config =
        serde_json::from_str(r#"{"ncbi": {"api_key": "from-file", "email": "file@example.org"}}"#)
            .unwrap();
    let env = EnvOverrides {
        api_key: Some("from-env".to_string()),
        email: Some("env@example.org".to_string()),
    };
    let resolved = ConfigLoader::resolve_config(config, &env).unwrap();
    assert_eq!(resolved.ncbi.api_key.as_deref(), Some("from-env"));
    assert_eq!(resolved.ncbi.email.as_deref(), Some("env@example.org"));
    assert_eq!(resolved.throttle.requests_per_window, 10);
}

#[test]
fn zero_session_timeout_disables_it() {
    let config: Config = serde_json::from_str(r#"{"session": {"timeout_secs": 0}}"#).unwrap();
    let resolved = ConfigLoader::resolve_config(config, &EnvOverrides::default()).unwrap();
    assert_eq!(resolved.session_timeout, None);
}

#[test]
fn session_timeout_must_exceed_call_timeout() {
    let config: Config = serde_json::from_str(
        r#"{"session": {"timeout_secs": 5}, "throttle": {"call_timeout_ms": 5000}}"#,
    )
    .unwrap();
    let err = ConfigLoader::resolve_config(config, &EnvOverrides::default()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}

#[test]
fn bad_bind_address() {
    let config: Config = serde_json::from_str(r#"{"server": {"bind": "localhost"}}"#).unwrap();
    let err = ConfigLoader::resolve_config(config, &EnvOverrides::default()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(message) if message.contains("server.bind"));
}

#[test]
fn explicit_missing_path_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}

#[test]
fn explicit_path_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kira-clade.json");
    std::fs::write(&path, r#"{"session": {"max_sessions": 2}}"#).unwrap();
    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.max_sessions, 2);
}

#[test]
fn invalid_json_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kira-clade.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}
