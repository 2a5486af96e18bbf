//! Background job runner with bounded retry.
//!
//! Every dispatched job runs on its own Tokio task, tracked by a
//! `TaskTracker` so shutdown can drain or abandon them. A job never touches
//! the alert queue and never reports back to the poll loop: its only output
//! is one terminal notification (two for a rollback, one per phase) and its
//! logs.
//!
//! # Retry semantics
//!
//! ```text
//! attempt 1 ── ok + conclusive ──> result notification, done
//!     │
//!     └─ timeout / error / inconclusive ── sleep(retry_delay) ──> attempt 2 ...
//!                                                     last attempt ──> error notification
//! ```
//!
//! A rollback is not idempotent, so its first phase gets exactly one
//! attempt. The recovery check that follows uses the normal policy.

use super::{JobContext, JobExecutor, JobKind, RetryPolicy};
use crate::config::DEFAULT_NO_CONCLUSION_MARKERS;
use crate::config::ShutdownPolicy;
use crate::context_cache::{AlertContext, AlertContextCache};
use crate::entity::{EntityExtractor, RegexEntityExtractor};
use crate::error::JobError;
use crate::notify::{NotificationKind, Notifier};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

const DEFAULT_VERIFY_DELAY: Duration = Duration::from_secs(300);

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { attempts: u32, report: String },
    Failed { attempts: u32, reason: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Whether an agent report can be delivered as a result.
///
/// Empty output, output starting with `ERROR`, and output containing one
/// of `markers` all mean the agent gave up without an answer.
pub fn is_conclusive(report: &str, markers: &[String]) -> bool {
    let trimmed = report.trim();
    if trimmed.is_empty() || trimmed.starts_with("ERROR") {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !markers
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

/// Holds one unit of `alertd_jobs_in_flight` until dropped, whether the job
/// finishes, panics or is aborted.
struct InFlightGuard {
    gauge: metrics::Gauge,
}

impl InFlightGuard {
    fn acquire() -> Self {
        let gauge = metrics::gauge!("alertd_jobs_in_flight");
        gauge.increment(1.0);
        Self { gauge }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
    }
}

/// Spawns and supervises background jobs.
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<dyn JobExecutor>,
    notifier: Arc<dyn Notifier>,
    cache: AlertContextCache,
    entities: Arc<dyn EntityExtractor>,
    policy: RetryPolicy,
    verify_delay: Duration,
    markers: Arc<[String]>,
    tracker: TaskTracker,
}

impl JobRunner {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        notifier: Arc<dyn Notifier>,
        cache: AlertContextCache,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            executor,
            notifier,
            cache,
            entities: Arc::new(RegexEntityExtractor::default()),
            policy,
            verify_delay: DEFAULT_VERIFY_DELAY,
            markers: DEFAULT_NO_CONCLUSION_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_entity_extractor(mut self, entities: Arc<dyn EntityExtractor>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_verify_delay(mut self, verify_delay: Duration) -> Self {
        self.verify_delay = verify_delay;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Number of jobs still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Start a job on its own task and return immediately.
    ///
    /// Dropping the handle detaches the job; it keeps running.
    pub fn spawn(&self, ctx: JobContext) -> JoinHandle<JobOutcome> {
        let span = tracing::info_span!(
            "job",
            cluster_id = %ctx.cluster_id,
            job_kind = %ctx.kind
        );
        let runner = self.clone();

        let in_flight = InFlightGuard::acquire();
        self.tracker.spawn(
            async move {
                let _in_flight = in_flight;
                match ctx.kind {
                    JobKind::Rollback => runner.run_rollback(ctx).await,
                    _ => runner.run_with_retry(&ctx).await,
                }
            }
            .instrument(span),
        )
    }

    /// Run a job to completion with the retry policy.
    ///
    /// Sends exactly one terminal notification: the report on success, or a
    /// single error once every attempt has failed.
    pub async fn run_with_retry(&self, ctx: &JobContext) -> JobOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(ctx, attempt).await {
                Ok(report) => {
                    info!(attempt, "Job succeeded");
                    metrics::counter!("alertd_jobs_succeeded_total", "kind" => ctx.kind.as_str())
                        .increment(1);
                    if ctx.kind == JobKind::Analyze {
                        self.remember(ctx, &report);
                    }
                    self.send(ctx, &report, ctx.kind.success_kind()).await;
                    return JobOutcome::Succeeded {
                        attempts: attempt,
                        report,
                    };
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Job attempt failed");
                    last_failure = e.to_string();
                }
            }

            if attempt < max_attempts {
                debug!(delay_ms = self.policy.retry_delay.as_millis(), "Waiting before retry");
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        error!(attempts = max_attempts, reason = %last_failure, "Job failed after all attempts");
        metrics::counter!("alertd_jobs_failed_total", "kind" => ctx.kind.as_str()).increment(1);
        let message = format!(
            "{} for cluster {} failed after {} attempts: {}",
            ctx.kind.label(),
            ctx.cluster_id,
            max_attempts,
            last_failure
        );
        self.send(ctx, &message, NotificationKind::Error).await;
        JobOutcome::Failed {
            attempts: max_attempts,
            reason: last_failure,
        }
    }

    /// Roll back once, report, wait, then verify recovery.
    ///
    /// The returned outcome is the rollback's if it failed, otherwise the
    /// recovery check's.
    async fn run_rollback(&self, ctx: JobContext) -> JobOutcome {
        let report = match self.attempt(&ctx, 1).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Rollback failed");
                metrics::counter!("alertd_jobs_failed_total", "kind" => ctx.kind.as_str())
                    .increment(1);
                let message = format!(
                    "Rollback of {} on cluster {} failed: {}",
                    ctx.app_name.as_deref().unwrap_or("the application"),
                    ctx.cluster_id,
                    e
                );
                self.send(&ctx, &message, NotificationKind::Error).await;
                return JobOutcome::Failed {
                    attempts: 1,
                    reason: e.to_string(),
                };
            }
        };

        metrics::counter!("alertd_jobs_succeeded_total", "kind" => ctx.kind.as_str())
            .increment(1);
        self.send(&ctx, &report, NotificationKind::RollbackResult).await;

        info!(
            delay_secs = self.verify_delay.as_secs(),
            "Rollback done, recovery check scheduled"
        );
        tokio::time::sleep(self.verify_delay).await;

        self.run_with_retry(&ctx.follow_up(JobKind::VerifyRecovery))
            .await
    }

    /// One attempt under the per-kind timeout.
    async fn attempt(&self, ctx: &JobContext, attempt: u32) -> Result<String, JobError> {
        let timeout = self.policy.timeout_for(ctx.kind);
        metrics::counter!("alertd_job_attempts_total", "kind" => ctx.kind.as_str()).increment(1);

        let report = tokio::time::timeout(timeout, self.executor.execute(ctx, attempt))
            .await
            .map_err(|_| JobError::Timeout(timeout))??;

        if is_conclusive(&report, &self.markers) {
            Ok(report)
        } else {
            let snippet: String = report.trim().chars().take(120).collect();
            Err(JobError::Inconclusive(snippet))
        }
    }

    fn remember(&self, ctx: &JobContext, report: &str) {
        let Some(recipient) = ctx.recipient.as_deref() else {
            return;
        };
        let (alert_id, policy_name) = ctx
            .alert
            .as_ref()
            .map(|a| (a.alert_id().to_string(), a.policy_name().to_string()))
            .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));

        self.cache.store(
            recipient,
            AlertContext {
                cluster_id: ctx.cluster_id.clone(),
                region: ctx.region.clone(),
                alert_id,
                policy_name,
                analysis: report.to_string(),
                app_name: self.entities.extract_entity(report),
                recorded_at: Utc::now(),
            },
        );
    }

    async fn send(&self, ctx: &JobContext, message: &str, kind: NotificationKind) {
        let Some(recipient) = ctx.recipient.as_deref() else {
            info!(kind = %kind, "No recipient bound, result only logged");
            return;
        };
        if let Err(e) = self.notifier.notify(recipient, message, kind).await {
            error!(recipient = %recipient, kind = %kind, error = %e, "Failed to deliver job notification");
        }
    }

    /// Stop accepting jobs and apply the shutdown policy to running ones.
    pub async fn shutdown(&self, policy: ShutdownPolicy, drain_timeout: Duration) {
        self.tracker.close();
        let in_flight = self.tracker.len();

        match policy {
            ShutdownPolicy::Abandon => {
                if in_flight > 0 {
                    warn!(in_flight, "Abandoning in-flight jobs");
                }
            }
            ShutdownPolicy::Drain => {
                if in_flight == 0 {
                    return;
                }
                info!(in_flight, timeout_secs = drain_timeout.as_secs(), "Draining in-flight jobs");
                if tokio::time::timeout(drain_timeout, self.tracker.wait())
                    .await
                    .is_err()
                {
                    warn!(
                        remaining = self.tracker.len(),
                        "Drain timeout reached, abandoning remaining jobs"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("policy", &self.policy)
            .field("verify_delay", &self.verify_delay)
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}
