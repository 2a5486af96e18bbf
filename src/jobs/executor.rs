//! Job execution against the agent service.

use super::{JobContext, JobKind};
use crate::error::JobError;
use crate::queue::InboundAlert;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Performs one attempt of a job and returns the agent's report.
///
/// Timeouts and retries belong to the runner; an executor only runs the
/// attempt it is given.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: &JobContext, attempt: u32) -> Result<String, JobError>;
}

#[derive(Debug, Serialize)]
struct AgentJobRequest<'a> {
    kind: JobKind,
    cluster_id: &'a str,
    region: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_name: Option<&'a str>,
    model: &'a str,
    top_p: f32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert: Option<&'a InboundAlert>,
    attempt: u32,
    credentials: AgentCredentials<'a>,
}

#[derive(Serialize)]
struct AgentCredentials<'a> {
    secret_id: &'a str,
    secret_key: &'a str,
}

impl std::fmt::Debug for AgentCredentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("secret_id", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct AgentJobResponse {
    report: String,
}

/// Executor that POSTs each attempt to `{agent.url}/jobs/{kind}`.
#[derive(Debug, Clone, Default)]
pub struct AgentServiceExecutor {
    client: reqwest::Client,
}

impl AgentServiceExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint(ctx: &JobContext) -> String {
        format!("{}/jobs/{}", ctx.agent.url.trim_end_matches('/'), ctx.kind)
    }
}

#[async_trait]
impl JobExecutor for AgentServiceExecutor {
    async fn execute(&self, ctx: &JobContext, attempt: u32) -> Result<String, JobError> {
        let agent = &ctx.agent;
        let request = AgentJobRequest {
            kind: ctx.kind,
            cluster_id: &ctx.cluster_id,
            region: &ctx.region,
            app_name: ctx.app_name.as_deref(),
            model: &agent.model,
            top_p: agent.top_p,
            temperature: agent.temperature,
            alert: ctx.alert.as_ref().map(|envelope| &envelope.alert),
            attempt,
            credentials: AgentCredentials {
                secret_id: agent.credentials.secret_id.expose(),
                secret_key: agent.credentials.secret_key.expose(),
            },
        };

        let response = self
            .client
            .post(Self::endpoint(ctx))
            .bearer_auth(agent.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| JobError::Execution(format!("agent request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(JobError::Execution(format!(
                "agent returned {}: {}",
                status, snippet
            )));
        }

        let parsed: AgentJobResponse = response
            .json()
            .await
            .map_err(|e| JobError::Execution(format!("invalid agent response: {}", e)))?;
        Ok(parsed.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::agent_settings;

    #[test]
    fn endpoint_joins_kind_without_double_slash() {
        let ctx = JobContext::new(
            JobKind::VerifyRecovery,
            "cls-a",
            "r",
            None,
            agent_settings("http://agent:9000/"),
        )
        .unwrap();
        assert_eq!(
            AgentServiceExecutor::endpoint(&ctx),
            "http://agent:9000/jobs/verify_recovery"
        );
    }

    #[test]
    fn request_omits_absent_optionals() {
        let ctx = JobContext::new(JobKind::Inspect, "cls-a", "r", None, agent_settings("http://a"))
            .unwrap();
        let request = AgentJobRequest {
            kind: ctx.kind,
            cluster_id: &ctx.cluster_id,
            region: &ctx.region,
            app_name: None,
            model: "m",
            top_p: 0.8,
            temperature: 0.7,
            alert: None,
            attempt: 2,
            credentials: AgentCredentials {
                secret_id: "id",
                secret_key: "key",
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["kind"], "inspect");
        assert_eq!(value["attempt"], 2);
        assert!(value.get("app_name").is_none());
        assert!(value.get("alert").is_none());
        assert_eq!(value["credentials"]["secret_id"], "id");
    }

    #[test]
    fn request_debug_hides_credentials() {
        let request = AgentJobRequest {
            kind: JobKind::Rollback,
            cluster_id: "cls-a",
            region: "r",
            app_name: Some("checkout"),
            model: "m",
            top_p: 0.8,
            temperature: 0.7,
            alert: None,
            attempt: 1,
            credentials: AgentCredentials {
                secret_id: "AKIDz8krbsJ5yKBZQpn74WFkmLPx3gnPhESA",
                secret_key: "qmX8vR2nT5kL9wP3zJ7bH4cF6dG1sA0yE8uI2oQ5",
            },
        };

        let debug = format!("{:?}", request);
        assert!(debug.contains("checkout"));
        assert!(!debug.contains("AKIDz8krbs"));
        assert!(!debug.contains("qmX8vR2n"));
        assert!(debug.contains("[REDACTED]"));
    }
}
