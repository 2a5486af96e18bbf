//! Configuration loading and validation for cluster-alertd.
//!
//! This module handles loading the YAML configuration file,
//! validation, and resolving environment variables for secrets.

mod env;
mod runtime;
mod secret;
mod types;
mod validation;

pub use env::resolve_env_vars;
pub use runtime::{AgentSettings, CloudCredentials, PushSettings, RuntimeConfig};
pub use secret::SecretString;
pub use types::{
    AgentConfig, CloudCredentialsConfig, Config, ConsumerConfig, ContextCacheConfig,
    DEFAULT_CONFIG_PATH, DEFAULT_ENTITY_PATTERNS, DEFAULT_NO_CONCLUSION_MARKERS, DEFAULT_REGION,
    EntityConfig, JobsConfig, MetricsConfig, NotifyConfig, QueueConfig, RoutingConfig,
    ServerConfig, ShutdownPolicy,
};

#[cfg(test)]
mod tests;
