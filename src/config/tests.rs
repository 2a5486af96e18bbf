//! Tests for Config loading, validation, and compilation.

use super::*;
use crate::error::ConfigError;
use serial_test::serial;
use std::path::PathBuf;
use std::time::Duration;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

// ============================================================
// Config Loading Tests
// ============================================================

#[test]
fn load_valid_config() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();

    assert_eq!(config.server.listen, "127.0.0.1:8003");
    assert_eq!(config.queue.capacity, 500);

    assert_eq!(config.consumer.poll_interval, Duration::from_secs(2));
    assert_eq!(config.consumer.idle_interval, Duration::from_secs(5));
    assert_eq!(config.consumer.start_delay, Duration::from_secs(1));
    assert_eq!(config.consumer.recipient.as_deref(), Some("a4:cf:12:9e:00:01"));
    assert_eq!(config.consumer.clusters.len(), 2);
    assert_eq!(config.consumer.clusters["cls-abc123"], "ap-shanghai");

    assert_eq!(config.jobs.max_attempts, 2);
    assert_eq!(config.jobs.retry_delay, Duration::from_secs(10));
    assert_eq!(config.jobs.heavy_timeout, Duration::from_secs(240));
    assert_eq!(config.jobs.on_shutdown, ShutdownPolicy::Abandon);

    assert_eq!(config.agent.model, "qwen-max");
    assert!((config.agent.top_p - 0.9).abs() < f32::EPSILON);
    // Not set in the file
    assert!((config.agent.temperature - 0.7).abs() < f32::EPSILON);

    assert_eq!(config.context_cache.ttl, Duration::from_secs(900));
    assert_eq!(config.entity.patterns.len(), 2);
    assert!(!config.metrics.enabled);
    assert_eq!(config.metrics.port, 9191);
}

#[test]
fn load_minimal_config_applies_defaults() {
    let config = Config::load(&fixture_path("config_minimal.yaml")).unwrap();

    assert_eq!(config.server.listen, "0.0.0.0:8003");
    assert_eq!(config.queue.capacity, 1000);
    assert_eq!(config.routing.pointer, "/alarmObjInfo/dimensions/objId");
    assert_eq!(config.routing.separator, "#");
    assert_eq!(config.routing.prefix, "cls-");
    assert_eq!(config.consumer.poll_interval, Duration::from_secs(1));
    assert_eq!(config.consumer.idle_interval, Duration::from_secs(3));
    assert_eq!(config.consumer.start_delay, Duration::from_secs(5));
    assert!(config.consumer.clusters.is_empty());
    assert_eq!(config.consumer.default_region, DEFAULT_REGION);
    assert!(config.consumer.recipient.is_none());

    assert_eq!(config.jobs.max_attempts, 3);
    assert_eq!(config.jobs.retry_delay, Duration::from_secs(5));
    assert_eq!(config.jobs.timeout, Duration::from_secs(120));
    assert_eq!(config.jobs.heavy_timeout, Duration::from_secs(300));
    assert_eq!(config.jobs.verify_delay, Duration::from_secs(300));
    assert_eq!(config.jobs.on_shutdown, ShutdownPolicy::Drain);
    assert_eq!(config.jobs.drain_timeout, Duration::from_secs(30));
    assert_eq!(
        config.jobs.no_conclusion_markers.len(),
        DEFAULT_NO_CONCLUSION_MARKERS.len()
    );

    assert_eq!(config.context_cache.ttl, Duration::from_secs(1800));
    assert_eq!(config.entity.patterns.len(), DEFAULT_ENTITY_PATTERNS.len());
    assert!(config.metrics.enabled);
    assert_eq!(config.metrics.port, 9090);
    assert_eq!(config.notify.timeout, Duration::from_secs(10));
}

#[test]
fn load_nonexistent_file_returns_load_error() {
    let result = Config::load(std::path::Path::new("/nonexistent/path/config.yaml"));
    match result.unwrap_err() {
        ConfigError::LoadError(msg) => assert!(msg.contains("/nonexistent/path/config.yaml")),
        e => panic!("Expected LoadError, got {:?}", e),
    }
}

#[test]
fn load_invalid_yaml_returns_validation_error() {
    let result = Config::load(&fixture_path("config_invalid_yaml.yaml"));
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn missing_agent_section_is_rejected() {
    let yaml = r#"
notify:
  push_url: "http://localhost:8003/push"
  auth_key: "k"
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("agent"));
}

#[test]
fn load_reads_custom_routing_from_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    let yaml = std::fs::read_to_string(fixture_path("config_minimal.yaml")).unwrap()
        + "\nrouting:\n  pointer: /resource/id\n  separator: \"|\"\n  prefix: k8s-\n";
    file.write_all(yaml.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.routing.pointer, "/resource/id");
    assert_eq!(config.routing.separator, "|");
    assert_eq!(config.routing.prefix, "k8s-");
    assert!(config.validate().is_ok());
}

#[test]
fn unknown_shutdown_policy_is_rejected() {
    let yaml = std::fs::read_to_string(fixture_path("config_minimal.yaml")).unwrap()
        + "\njobs:\n  on_shutdown: linger\n";
    assert!(Config::from_yaml(&yaml).is_err());
}

// ============================================================
// Validation Tests
// ============================================================

#[test]
fn validate_valid_config() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();
    assert!(config.validate().is_ok());
}

#[test]
fn validate_collects_all_errors() {
    let config = Config::load(&fixture_path("config_invalid_credentials.yaml")).unwrap();
    let errors = config.validate().unwrap_err();

    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    assert_eq!(errors.len(), 9, "unexpected errors: {:#?}", messages);

    let has = |needle: &str| messages.iter().any(|m| m.contains(needle));
    assert!(has("server.listen"));
    assert!(has("queue.capacity"));
    assert!(has("jobs.max_attempts"));
    assert!(has("'agent.model'"));
    assert!(has("'agent.api_key': looks like a placeholder"));
    assert!(has("'agent.credentials.secret_id'"));
    assert!(has("'agent.credentials.secret_key'"));
    assert!(has("entity.patterns[0]"));
    assert!(has("entity.patterns[1]': pattern must contain a capture group"));
}

#[test]
#[serial]
fn validate_resolves_secrets_from_environment() {
    temp_env::with_vars(
        [
            ("ALERTD_TEST_API_KEY", Some("sk-3f9c2b7e41d04a6b")),
            ("ALERTD_TEST_SECRET_ID", Some("AKIDz8krbsJ5yKBZQpn74WFkmLPx3gnPhESA")),
            ("ALERTD_TEST_SECRET_KEY", Some("qmX8vR2nT5kL9wP3zJ7bH4cF6dG1sA0yE8uI2oQ5")),
            ("ALERTD_TEST_AUTH_KEY", Some("gw-auth-key")),
        ],
        || {
            let config = Config::load(&fixture_path("config_env_secrets.yaml")).unwrap();
            assert!(config.validate().is_ok());

            let runtime = config.compile().unwrap();
            assert_eq!(runtime.agent.api_key.expose(), "sk-3f9c2b7e41d04a6b");
            assert_eq!(runtime.push.auth_key.expose(), "gw-auth-key");
        },
    );
}

#[test]
#[serial]
fn validate_reports_undefined_secret_variables() {
    temp_env::with_vars(
        [
            ("ALERTD_TEST_API_KEY", None::<&str>),
            ("ALERTD_TEST_SECRET_ID", None),
            ("ALERTD_TEST_SECRET_KEY", None),
            ("ALERTD_TEST_AUTH_KEY", None),
        ],
        || {
            let config = Config::load(&fixture_path("config_env_secrets.yaml")).unwrap();
            let errors = config.validate().unwrap_err();
            assert_eq!(errors.len(), 4);
            assert!(
                errors
                    .iter()
                    .all(|e| matches!(e, ConfigError::InvalidCredential { .. }))
            );
            assert!(errors[0].to_string().contains("ALERTD_TEST_API_KEY"));
        },
    );
}

// ============================================================
// Compile Tests
// ============================================================

#[test]
fn compile_builds_runtime_config() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();
    let runtime = config.compile().unwrap();

    assert_eq!(runtime.listen.port(), 8003);
    assert_eq!(runtime.queue_capacity, 500);
    assert_eq!(runtime.entity_patterns.len(), 2);
    assert_eq!(runtime.agent.url, "http://agent.internal:9000");
    assert_eq!(runtime.push.timeout, Duration::from_secs(5));
    assert!(runtime.agent.validate().is_ok());
}

#[test]
fn runtime_config_debug_redacts_secrets() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();
    let runtime = config.compile().unwrap();

    let debug = format!("{:?}", runtime);
    assert!(!debug.contains("sk-3f9c2b7e41d04a6b"));
    assert!(!debug.contains("AKIDz8krbs"));
    assert!(!debug.contains("gw-auth-key"));
    assert!(debug.contains("[REDACTED]"));
}

#[test]
fn agent_settings_validate_returns_first_problem() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();
    let mut agent = config.compile().unwrap().agent;

    agent.api_key = SecretString::from("please_set");
    agent.credentials.secret_key = SecretString::from("short");

    match agent.validate().unwrap_err() {
        ConfigError::InvalidCredential { field, .. } => assert_eq!(field, "agent.api_key"),
        e => panic!("Expected InvalidCredential, got {:?}", e),
    }
}
