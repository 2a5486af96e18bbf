//! Short-lived cache of the last analysis per recipient.
//!
//! A corrective action (rollback) usually follows the analysis the user just
//! heard, so the cluster and application it needs are looked up here instead
//! of being asked for again. Entries expire after a fixed TTL; moka evicts
//! lazily, so a read never returns an expired entry.

use crate::config::ContextCacheConfig;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;
use std::time::Duration;

/// What a successful analysis left behind for follow-up actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertContext {
    pub cluster_id: String,
    pub region: String,
    pub alert_id: String,
    pub policy_name: String,
    pub analysis: String,
    pub app_name: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Recipient id -> most recent [`AlertContext`].
#[derive(Clone)]
pub struct AlertContextCache {
    cache: Cache<String, AlertContext>,
    ttl: Duration,
}

impl AlertContextCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_entries)
            .build();
        Self { cache, ttl }
    }

    pub fn from_config(config: &ContextCacheConfig) -> Self {
        Self::new(config.ttl, config.max_entries)
    }

    /// Store the context for `recipient`, replacing any previous entry.
    pub fn store(&self, recipient: &str, context: AlertContext) {
        tracing::debug!(
            recipient = %recipient,
            cluster_id = %context.cluster_id,
            app_name = ?context.app_name,
            "Alert context cached"
        );
        self.cache.insert(recipient.to_string(), context);
    }

    pub fn get(&self, recipient: &str) -> Option<AlertContext> {
        self.cache.get(recipient)
    }

    pub fn invalidate(&self, recipient: &str) {
        self.cache.invalidate(recipient);
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for AlertContextCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertContextCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(cluster_id: &str, app: Option<&str>) -> AlertContext {
        AlertContext {
            cluster_id: cluster_id.to_string(),
            region: "ap-guangzhou".to_string(),
            alert_id: "alert-1".to_string(),
            policy_name: "pod-restarts".to_string(),
            analysis: "app: checkout keeps crashing".to_string(),
            app_name: app.map(str::to_string),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn one_entry_per_recipient() {
        let cache = AlertContextCache::new(Duration::from_secs(60), 100);
        cache.store("dev-1", context("cls-a", Some("checkout")));
        cache.store("dev-1", context("cls-b", None));

        let stored = cache.get("dev-1").unwrap();
        assert_eq!(stored.cluster_id, "cls-b");
        assert!(stored.app_name.is_none());
        assert!(cache.get("dev-2").is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        // moka tracks TTL on its own clock, so this uses real time
        let cache = AlertContextCache::new(Duration::from_millis(100), 100);
        cache.store("dev-1", context("cls-a", Some("checkout")));
        assert!(cache.get("dev-1").is_some());

        std::thread::sleep(Duration::from_millis(150));
        assert!(cache.get("dev-1").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = AlertContextCache::from_config(&ContextCacheConfig::default());
        assert_eq!(cache.ttl(), Duration::from_secs(1800));

        cache.store("dev-1", context("cls-a", None));
        cache.invalidate("dev-1");
        assert!(cache.get("dev-1").is_none());
    }
}
