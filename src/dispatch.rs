//! Turns dequeued alerts and operator requests into background jobs.

use crate::config::{AgentSettings, DEFAULT_REGION, RuntimeConfig};
use crate::consumer::AlertHandler;
use crate::context_cache::{AlertContext, AlertContextCache};
use crate::error::JobError;
use crate::jobs::{JobContext, JobKind, JobOutcome, JobRunner};
use crate::notify::{NotificationKind, Notifier};
use crate::queue::AlertEnvelope;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A job that has been accepted and is running in the background.
#[derive(Debug)]
pub struct DispatchedJob {
    pub kind: JobKind,
    pub cluster_id: String,
    pub app_name: Option<String>,
    pub handle: JoinHandle<JobOutcome>,
}

/// Per-alert handler and entry point for on-demand jobs.
///
/// Alerts are acknowledged to the configured recipient and analyzed in the
/// background. Inspections and rollbacks name their own recipient, and fall
/// back to the last analysis that recipient received when the target is
/// omitted.
pub struct AlertDispatcher {
    runner: JobRunner,
    notifier: Arc<dyn Notifier>,
    cache: AlertContextCache,
    agent: Arc<AgentSettings>,
    recipient: Option<String>,
    regions: BTreeMap<String, String>,
    default_region: String,
}

impl AlertDispatcher {
    pub fn new(
        runner: JobRunner,
        notifier: Arc<dyn Notifier>,
        cache: AlertContextCache,
        agent: Arc<AgentSettings>,
    ) -> Self {
        Self {
            runner,
            notifier,
            cache,
            agent,
            recipient: None,
            regions: BTreeMap::new(),
            default_region: DEFAULT_REGION.to_string(),
        }
    }

    /// Build from the compiled configuration.
    pub fn from_config(
        runner: JobRunner,
        notifier: Arc<dyn Notifier>,
        cache: AlertContextCache,
        config: &RuntimeConfig,
    ) -> Self {
        Self::new(runner, notifier, cache, Arc::new(config.agent.clone()))
            .with_recipient(config.consumer.recipient.clone())
            .with_regions(
                config.consumer.clusters.clone(),
                config.consumer.default_region.clone(),
            )
    }

    /// Device that receives alert acknowledgements and analysis results.
    pub fn with_recipient(mut self, recipient: Option<String>) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn with_regions(
        mut self,
        regions: BTreeMap<String, String>,
        default_region: impl Into<String>,
    ) -> Self {
        self.regions = regions;
        self.default_region = default_region.into();
        self
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    fn region_for(&self, cluster_id: &str) -> String {
        self.regions
            .get(cluster_id)
            .cloned()
            .unwrap_or_else(|| self.default_region.clone())
    }

    async fn tell(&self, recipient: Option<&str>, message: &str, kind: NotificationKind) {
        let Some(recipient) = recipient else {
            return;
        };
        if let Err(e) = self.notifier.notify(recipient, message, kind).await {
            warn!(recipient = %recipient, kind = %kind, error = %e, "Notification failed");
        }
    }

    /// Cluster and region for an on-demand job, falling back to the
    /// recipient's last analysis when no cluster is named.
    fn resolve_cluster(
        &self,
        cluster_id: Option<String>,
        cached: Option<&AlertContext>,
    ) -> Result<(String, String), JobError> {
        match (cluster_id, cached) {
            (Some(id), _) => {
                let region = self.region_for(&id);
                Ok((id, region))
            }
            (None, Some(ctx)) => Ok((ctx.cluster_id.clone(), ctx.region.clone())),
            (None, None) => Err(JobError::MissingContext(
                "no cluster given and no recent alert for this recipient".to_string(),
            )),
        }
    }

    /// Start a read-only inspection of a cluster.
    ///
    /// Without `cluster_id` the cluster of the recipient's last analysis is
    /// used.
    pub fn dispatch_inspect(
        &self,
        recipient: &str,
        cluster_id: Option<String>,
    ) -> Result<DispatchedJob, JobError> {
        let (cluster_id, region) =
            self.resolve_cluster(cluster_id, self.cache.get(recipient).as_ref())?;

        let ctx = JobContext::new(
            JobKind::Inspect,
            cluster_id,
            region,
            Some(recipient.to_string()),
            self.agent.clone(),
        )?;
        Ok(self.start(ctx))
    }

    /// Start an alarm analysis of a cluster on request, without an alert.
    ///
    /// The agent looks at the cluster's current alarms itself. A successful
    /// result replaces the recipient's cached context like any other
    /// analysis.
    pub fn dispatch_analyze(
        &self,
        recipient: &str,
        cluster_id: Option<String>,
    ) -> Result<DispatchedJob, JobError> {
        let (cluster_id, region) =
            self.resolve_cluster(cluster_id, self.cache.get(recipient).as_ref())?;

        let ctx = JobContext::new(
            JobKind::Analyze,
            cluster_id,
            region,
            Some(recipient.to_string()),
            self.agent.clone(),
        )?;
        Ok(self.start(ctx))
    }

    /// Start a rollback followed by a recovery check.
    ///
    /// The cluster and application default to the recipient's last analysis;
    /// a rollback with no application to target is refused.
    pub fn dispatch_rollback(
        &self,
        recipient: &str,
        cluster_id: Option<String>,
        app_name: Option<String>,
    ) -> Result<DispatchedJob, JobError> {
        let cached = self.cache.get(recipient);
        let (cluster_id, region) = self.resolve_cluster(cluster_id, cached.as_ref())?;
        let app_name = app_name
            .or_else(|| cached.and_then(|ctx| ctx.app_name))
            .ok_or_else(|| {
                JobError::MissingContext(format!(
                    "no application named for rollback on {}",
                    cluster_id
                ))
            })?;

        let ctx = JobContext::new(
            JobKind::Rollback,
            cluster_id,
            region,
            Some(recipient.to_string()),
            self.agent.clone(),
        )?
        .with_app_name(Some(app_name));
        Ok(self.start(ctx))
    }

    fn start(&self, ctx: JobContext) -> DispatchedJob {
        info!(
            cluster_id = %ctx.cluster_id,
            job_kind = %ctx.kind,
            app_name = ?ctx.app_name,
            "Job dispatched"
        );
        DispatchedJob {
            kind: ctx.kind,
            cluster_id: ctx.cluster_id.clone(),
            app_name: ctx.app_name.clone(),
            handle: self.runner.spawn(ctx),
        }
    }
}

#[async_trait]
impl AlertHandler for AlertDispatcher {
    async fn handle(&self, key: &str, envelope: AlertEnvelope) {
        let recipient = self.recipient.as_deref();
        info!(
            cluster_id = %key,
            alert_id = %envelope.alert_id(),
            policy = %envelope.policy_name(),
            "Alert received"
        );

        let ack = format!(
            "Cluster {} received a new alert ({}). Analyzing now.",
            key,
            envelope.policy_name()
        );
        self.tell(recipient, &ack, NotificationKind::Info).await;

        let ctx = match JobContext::new(
            JobKind::Analyze,
            key,
            self.region_for(key),
            self.recipient.clone(),
            self.agent.clone(),
        ) {
            Ok(ctx) => ctx.with_alert(envelope),
            Err(e) => {
                error!(cluster_id = %key, error = %e, "Could not start alert analysis");
                let message = format!("Alert analysis for cluster {} could not start: {}", key, e);
                self.tell(recipient, &message, NotificationKind::Error).await;
                return;
            }
        };

        // Detached; the runner reports the outcome itself.
        drop(self.runner.spawn(ctx));
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("recipient", &self.recipient)
            .field("regions", &self.regions)
            .field("default_region", &self.default_region)
            .finish()
    }
}
