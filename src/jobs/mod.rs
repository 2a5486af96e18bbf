//! Background jobs: analysis, inspection, rollback and recovery checks.
//!
//! A job is described by a [`JobContext`], executed by a [`JobExecutor`]
//! and driven by the [`JobRunner`], which owns retries, per-attempt
//! timeouts and the terminal notification.

pub mod executor;
pub mod runner;

pub use executor::{AgentServiceExecutor, JobExecutor};
pub use runner::{JobOutcome, JobRunner, is_conclusive};

use crate::config::{AgentSettings, JobsConfig};
use crate::error::JobError;
use crate::notify::NotificationKind;
use crate::queue::AlertEnvelope;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// The long-running workflows a job can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Read-only health inspection of a cluster.
    Inspect,
    /// Root-cause analysis of a single alert.
    Analyze,
    /// Corrective rollback of an application.
    Rollback,
    /// Read-only check that a rollback restored service.
    VerifyRecovery,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Analyze => "analyze",
            Self::Rollback => "rollback",
            Self::VerifyRecovery => "verify_recovery",
        }
    }

    /// Human wording used in failure notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inspect => "Cluster inspection",
            Self::Analyze => "Alert analysis",
            Self::Rollback => "Rollback",
            Self::VerifyRecovery => "Recovery check",
        }
    }

    /// Notification kind used to deliver a successful result.
    pub fn success_kind(&self) -> NotificationKind {
        match self {
            Self::Inspect => NotificationKind::InspectionResult,
            Self::Analyze => NotificationKind::AnalysisResult,
            Self::Rollback => NotificationKind::RollbackResult,
            Self::VerifyRecovery => NotificationKind::RecoveryCheckResult,
        }
    }

    /// Everything except alert analysis drives a multi-step agent session.
    pub fn is_heavy(&self) -> bool {
        !matches!(self, Self::Analyze)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt limits and timeouts shared by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub heavy_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            timeout: config.timeout,
            heavy_timeout: config.heavy_timeout,
        }
    }

    pub fn timeout_for(&self, kind: JobKind) -> Duration {
        if kind.is_heavy() {
            self.heavy_timeout
        } else {
            self.timeout
        }
    }
}

/// Everything one dispatched job needs, fixed at construction.
///
/// Credentials are validated in [`JobContext::new`], so a context that
/// exists is one whose first remote call will not be refused for a
/// malformed key.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub kind: JobKind,
    pub cluster_id: String,
    pub region: String,
    /// Device that receives the result; `None` means results are only logged.
    pub recipient: Option<String>,
    pub agent: Arc<AgentSettings>,
    pub alert: Option<AlertEnvelope>,
    pub app_name: Option<String>,
}

impl JobContext {
    /// Build a context, failing fast on a missing cluster or bad credentials.
    pub fn new(
        kind: JobKind,
        cluster_id: impl Into<String>,
        region: impl Into<String>,
        recipient: Option<String>,
        agent: Arc<AgentSettings>,
    ) -> Result<Self, JobError> {
        let cluster_id = cluster_id.into();
        if cluster_id.trim().is_empty() {
            return Err(JobError::MissingContext("cluster id is empty".to_string()));
        }
        agent.validate()?;

        Ok(Self {
            kind,
            cluster_id,
            region: region.into(),
            recipient,
            agent,
            alert: None,
            app_name: None,
        })
    }

    pub fn with_alert(mut self, alert: AlertEnvelope) -> Self {
        self.alert = Some(alert);
        self
    }

    pub fn with_app_name(mut self, app_name: Option<String>) -> Self {
        self.app_name = app_name;
        self
    }

    /// Same cluster, recipient and credentials, different workflow.
    pub fn follow_up(&self, kind: JobKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{CloudCredentials, SecretString};

    pub fn agent_settings(url: &str) -> Arc<AgentSettings> {
        Arc::new(AgentSettings {
            url: url.to_string(),
            model: "qwen-max".to_string(),
            api_key: SecretString::from("sk-3f9c2b7e41d04a6b"),
            top_p: 0.8,
            temperature: 0.7,
            credentials: CloudCredentials {
                secret_id: SecretString::from("AKIDz8krbsJ5yKBZQpn74WFkmLPx3gnPhESA"),
                secret_key: SecretString::from("qmX8vR2nT5kL9wP3zJ7bH4cF6dG1sA0yE8uI2oQ5"),
            },
        })
    }
}
