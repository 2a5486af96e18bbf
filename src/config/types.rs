//! Core configuration types and loading.

use super::env::resolve_env_vars;
use super::validation::{
    validate_api_key, validate_model, validate_secret_id, validate_secret_key,
};
use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cluster-alertd/config.yaml";

/// Region used for clusters that are not listed in `consumer.clusters`.
pub const DEFAULT_REGION: &str = "ap-guangzhou";

/// Patterns used to pull an application name out of free-text analysis.
pub const DEFAULT_ENTITY_PATTERNS: &[&str] = &[
    r"(?i)application\s+name\s*[:：]\s*([a-zA-Z0-9\-_.]+)",
    r"(?i)problem\s+application\s*[:：]\s*([a-zA-Z0-9\-_.]+)",
    r"(?i)service\s+name\s*[:：]\s*([a-zA-Z0-9\-_.]+)",
    r"(?i)\bapp\s*[:：]\s*([a-zA-Z0-9\-_.]+)",
    r"(?i)\bname\s*[:：]\s*([a-zA-Z0-9\-_.]+)",
    r"(?i)deployment\s+([a-zA-Z0-9\-_.]+)",
    r"(?i)\bpod\s+([a-zA-Z0-9\-_.]+)",
    r"(?i)container\s+([a-zA-Z0-9\-_.]+)",
];

/// Markers an agent emits when it could not reach a conclusion.
pub const DEFAULT_NO_CONCLUSION_MARKERS: &[&str] = &[
    "no valid conclusion",
    "no inspection response received",
    "missing credentials",
];

/// Main configuration structure for cluster-alertd.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// HTTP ingestion and status surface.
    #[serde(default)]
    pub server: ServerConfig,
    /// Per-cluster queue sizing.
    #[serde(default)]
    pub queue: QueueConfig,
    /// How a routing key is derived from an alert body.
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Polling consumer cadence and scope.
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Retry, timeout and shutdown policy for background jobs.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Agent service endpoint, model and credentials.
    pub agent: AgentConfig,
    /// Device push gateway.
    pub notify: NotifyConfig,
    #[serde(default)]
    pub context_cache: ContextCacheConfig,
    #[serde(default)]
    pub entity: EntityConfig,
    /// Metrics exposition configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8003".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum alerts retained per routing key; the oldest is evicted beyond it.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

/// Routing key extraction settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// JSON pointer into `request_body` locating the composite identifier.
    #[serde(default = "default_pointer")]
    pub pointer: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_pointer() -> String {
    "/alarmObjInfo/dimensions/objId".to_string()
}

fn default_separator() -> String {
    "#".to_string()
}

fn default_prefix() -> String {
    "cls-".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            pointer: default_pointer(),
            separator: default_separator(),
            prefix: default_prefix(),
        }
    }
}

/// Polling consumer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Sleep between poll cycles.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Sleep when no routing keys are known yet.
    #[serde(default = "default_idle_interval", with = "humantime_serde")]
    pub idle_interval: Duration,
    /// Delay before the first poll cycle.
    #[serde(default = "default_start_delay", with = "humantime_serde")]
    pub start_delay: Duration,
    /// Cluster id -> region. When empty every key seen by the queue is polled.
    #[serde(default)]
    pub clusters: BTreeMap<String, String>,
    #[serde(default = "default_region")]
    pub default_region: String,
    /// Device that receives acknowledgements and analysis results.
    #[serde(default)]
    pub recipient: Option<String>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_idle_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_start_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            idle_interval: default_idle_interval(),
            start_delay: default_start_delay(),
            clusters: BTreeMap::new(),
            default_region: default_region(),
            recipient: None,
        }
    }
}

/// What happens to dispatched jobs when the process shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Wait for in-flight jobs up to `drain_timeout`.
    #[default]
    Drain,
    /// Exit immediately; in-flight jobs are dropped with the runtime.
    Abandon,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Per-attempt timeout for analysis jobs.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Per-attempt timeout for inspection, rollback and verification jobs.
    #[serde(default = "default_heavy_timeout", with = "humantime_serde")]
    pub heavy_timeout: Duration,
    /// Wait between a rollback and its recovery verification.
    #[serde(default = "default_verify_delay", with = "humantime_serde")]
    pub verify_delay: Duration,
    #[serde(default)]
    pub on_shutdown: ShutdownPolicy,
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
    #[serde(default = "default_no_conclusion_markers")]
    pub no_conclusion_markers: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_heavy_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_verify_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_no_conclusion_markers() -> Vec<String> {
    DEFAULT_NO_CONCLUSION_MARKERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            timeout: default_timeout(),
            heavy_timeout: default_heavy_timeout(),
            verify_delay: default_verify_delay(),
            on_shutdown: ShutdownPolicy::default(),
            drain_timeout: default_drain_timeout(),
            no_conclusion_markers: default_no_conclusion_markers(),
        }
    }
}

/// Agent service configuration. Secret fields accept `${VAR}` references.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub url: String,
    pub model: String,
    pub api_key: String,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub credentials: CloudCredentialsConfig,
}

fn default_top_p() -> f32 {
    0.8
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudCredentialsConfig {
    pub secret_id: String,
    pub secret_key: String,
}

/// Device push gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub push_url: String,
    pub auth_key: String,
    #[serde(default = "default_push_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_push_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextCacheConfig {
    #[serde(default = "default_context_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    #[serde(default = "default_context_max_entries")]
    pub max_entries: u64,
}

fn default_context_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_context_max_entries() -> u64 {
    10_000
}

impl Default for ContextCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_context_ttl(),
            max_entries: default_context_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    #[serde(default = "default_entity_patterns")]
    pub patterns: Vec<String>,
}

fn default_entity_patterns() -> Vec<String> {
    DEFAULT_ENTITY_PATTERNS.iter().map(|s| s.to_string()).collect()
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            patterns: default_entity_patterns(),
        }
    }
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Port to expose metrics on (default: 9090).
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// # Errors
    /// Returns [`ConfigError::LoadError`] if the file cannot be read.
    /// Returns [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Validate every section and collect all errors.
    ///
    /// Secret fields are resolved against the environment before their
    /// format is checked, so a missing variable is reported here rather
    /// than when the first job is built.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.server.listen.parse::<SocketAddr>().is_err() {
            errors.push(ConfigError::ValidationError(format!(
                "server.listen '{}' is not a valid socket address",
                self.server.listen
            )));
        }

        if self.queue.capacity == 0 {
            errors.push(ConfigError::ValidationError(
                "queue.capacity must be greater than 0".to_string(),
            ));
        }

        if !self.routing.pointer.starts_with('/') {
            errors.push(ConfigError::ValidationError(format!(
                "routing.pointer '{}' must be a JSON pointer starting with '/'",
                self.routing.pointer
            )));
        }
        if self.routing.separator.is_empty() || self.routing.prefix.is_empty() {
            errors.push(ConfigError::ValidationError(
                "routing.separator and routing.prefix must not be empty".to_string(),
            ));
        }

        if self.consumer.poll_interval.is_zero() {
            errors.push(ConfigError::ValidationError(
                "consumer.poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.jobs.max_attempts == 0 {
            errors.push(ConfigError::ValidationError(
                "jobs.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.jobs.timeout.is_zero() || self.jobs.heavy_timeout.is_zero() {
            errors.push(ConfigError::ValidationError(
                "jobs.timeout and jobs.heavy_timeout must be greater than 0".to_string(),
            ));
        }

        if reqwest::Url::parse(&self.agent.url).is_err() {
            errors.push(ConfigError::ValidationError(format!(
                "agent.url '{}' is not a valid URL",
                self.agent.url
            )));
        }
        if reqwest::Url::parse(&self.notify.push_url).is_err() {
            errors.push(ConfigError::ValidationError(format!(
                "notify.push_url '{}' is not a valid URL",
                self.notify.push_url
            )));
        }

        self.validate_secrets(&mut errors);

        for (idx, pattern) in self.entity.patterns.iter().enumerate() {
            let message = match Regex::new(pattern) {
                Ok(re) if re.captures_len() < 2 => "pattern must contain a capture group".to_string(),
                Ok(_) => continue,
                Err(e) => e.to_string(),
            };
            errors.push(ConfigError::InvalidRegex {
                field: format!("entity.patterns[{}]", idx),
                message,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_secrets(&self, errors: &mut Vec<ConfigError>) {
        if let Err(message) = validate_model(&self.agent.model) {
            errors.push(credential_error("agent.model", message));
        }

        let checks: [(&str, &str, fn(&str) -> Result<(), String>); 3] = [
            ("agent.api_key", &self.agent.api_key, validate_api_key),
            (
                "agent.credentials.secret_id",
                &self.agent.credentials.secret_id,
                validate_secret_id,
            ),
            (
                "agent.credentials.secret_key",
                &self.agent.credentials.secret_key,
                validate_secret_key,
            ),
        ];

        for (field, raw, check) in checks {
            match resolve_env_vars(raw) {
                Ok(value) => {
                    if let Err(message) = check(&value) {
                        errors.push(credential_error(field, message));
                    }
                }
                Err(e) => errors.push(credential_error(field, e.to_string())),
            }
        }

        if let Err(e) = resolve_env_vars(&self.notify.auth_key) {
            errors.push(credential_error("notify.auth_key", e.to_string()));
        }
    }
}

fn credential_error(field: &str, message: String) -> ConfigError {
    ConfigError::InvalidCredential {
        field: field.to_string(),
        message,
    }
}
