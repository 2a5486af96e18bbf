//! Runtime configuration with resolved secrets and pre-compiled patterns.

use super::env::resolve_secret;
use super::secret::SecretString;
use super::types::{
    Config, ConsumerConfig, ContextCacheConfig, JobsConfig, MetricsConfig, RoutingConfig,
};
use super::validation::{
    validate_api_key, validate_model, validate_secret_id, validate_secret_key,
};
use crate::error::ConfigError;
use regex::Regex;
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime configuration, built once at startup by [`Config::compile`].
#[derive(Debug)]
pub struct RuntimeConfig {
    pub listen: SocketAddr,
    pub queue_capacity: usize,
    pub routing: RoutingConfig,
    pub consumer: ConsumerConfig,
    pub jobs: JobsConfig,
    pub agent: AgentSettings,
    pub push: PushSettings,
    pub context_cache: ContextCacheConfig,
    pub entity_patterns: Vec<Regex>,
    pub metrics: MetricsConfig,
}

/// Cloud account credentials handed to the agent service with every job.
#[derive(Debug, Clone)]
pub struct CloudCredentials {
    pub secret_id: SecretString,
    pub secret_key: SecretString,
}

/// Agent endpoint, model selection and credentials.
///
/// Read-only once built; jobs share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub url: String,
    pub model: String,
    pub api_key: SecretString,
    pub top_p: f32,
    pub temperature: f32,
    pub credentials: CloudCredentials,
}

impl AgentSettings {
    /// Checks model and credentials, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&str, &str, fn(&str) -> Result<(), String>); 4] = [
            ("agent.model", &self.model, validate_model),
            ("agent.api_key", self.api_key.expose(), validate_api_key),
            (
                "agent.credentials.secret_id",
                self.credentials.secret_id.expose(),
                validate_secret_id,
            ),
            (
                "agent.credentials.secret_key",
                self.credentials.secret_key.expose(),
                validate_secret_key,
            ),
        ];

        for (field, value, check) in checks {
            check(value).map_err(|message| ConfigError::InvalidCredential {
                field: field.to_string(),
                message,
            })?;
        }
        Ok(())
    }
}

/// Device push gateway settings.
#[derive(Debug, Clone)]
pub struct PushSettings {
    pub url: String,
    pub auth_key: SecretString,
    pub timeout: Duration,
}

impl Config {
    /// Compile configuration into runtime-ready format.
    ///
    /// Call after [`Config::validate`]; any error returned here means the
    /// environment changed between the two calls.
    pub fn compile(self) -> Result<RuntimeConfig, ConfigError> {
        let listen = self.server.listen.parse::<SocketAddr>().map_err(|e| {
            ConfigError::ValidationError(format!("server.listen '{}': {}", self.server.listen, e))
        })?;

        let agent = AgentSettings {
            url: self.agent.url,
            model: self.agent.model,
            api_key: resolve_secret("agent.api_key", &self.agent.api_key)?,
            top_p: self.agent.top_p,
            temperature: self.agent.temperature,
            credentials: CloudCredentials {
                secret_id: resolve_secret(
                    "agent.credentials.secret_id",
                    &self.agent.credentials.secret_id,
                )?,
                secret_key: resolve_secret(
                    "agent.credentials.secret_key",
                    &self.agent.credentials.secret_key,
                )?,
            },
        };
        agent.validate()?;

        let push = PushSettings {
            url: self.notify.push_url,
            auth_key: resolve_secret("notify.auth_key", &self.notify.auth_key)?,
            timeout: self.notify.timeout,
        };

        let entity_patterns = self
            .entity
            .patterns
            .iter()
            .enumerate()
            .map(|(idx, pattern)| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
                    field: format!("entity.patterns[{}]", idx),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RuntimeConfig {
            listen,
            queue_capacity: self.queue.capacity,
            routing: self.routing,
            consumer: self.consumer,
            jobs: self.jobs,
            agent,
            push,
            context_cache: self.context_cache,
            entity_patterns,
            metrics: self.metrics,
        })
    }
}
