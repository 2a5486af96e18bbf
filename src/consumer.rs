//! Polling consumer that drains per-cluster queues.
//!
//! Each cycle takes the keys in scope, pops at most one alert per key and
//! hands it straight to the [`AlertHandler`]. Handlers must return quickly:
//! slow work belongs in a spawned job, never in the poll loop.
//!
//! ```text
//! start_delay ─> POLL_KEYS ─┬─ keys known ─> consume each ─> sleep(poll_interval) ─┐
//!                  ^        └─ no keys ───────────────────> sleep(idle_interval) ─┤
//!                  └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cancellation is checked at every sleep, so the loop stops within one
//! cycle. Jobs already dispatched are not touched.

use crate::config::ConsumerConfig;
use crate::queue::{AlertEnvelope, AlertQueue};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Receives each dequeued alert.
///
/// Failures stay inside the handler; the signature has no error to return.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, key: &str, envelope: AlertEnvelope);
}

/// Which routing keys a consumer polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScope {
    /// Every key the queue has seen so far.
    All,
    /// A fixed set of keys, polled whether or not alerts arrived for them.
    Fixed(Vec<String>),
}

pub struct AlertConsumer {
    queue: AlertQueue,
    handler: Arc<dyn AlertHandler>,
    scope: KeyScope,
    poll_interval: Duration,
    idle_interval: Duration,
    start_delay: Duration,
}

impl AlertConsumer {
    pub fn new(queue: AlertQueue, handler: Arc<dyn AlertHandler>, scope: KeyScope) -> Self {
        let defaults = ConsumerConfig::default();
        Self {
            queue,
            handler,
            scope,
            poll_interval: defaults.poll_interval,
            idle_interval: defaults.idle_interval,
            start_delay: defaults.start_delay,
        }
    }

    /// Build from configuration. An empty `clusters` map means [`KeyScope::All`].
    pub fn from_config(
        queue: AlertQueue,
        handler: Arc<dyn AlertHandler>,
        config: &ConsumerConfig,
    ) -> Self {
        let scope = if config.clusters.is_empty() {
            KeyScope::All
        } else {
            KeyScope::Fixed(config.clusters.keys().cloned().collect())
        };
        Self::new(queue, handler, scope).with_intervals(
            config.poll_interval,
            config.idle_interval,
            config.start_delay,
        )
    }

    pub fn with_intervals(
        mut self,
        poll_interval: Duration,
        idle_interval: Duration,
        start_delay: Duration,
    ) -> Self {
        self.poll_interval = poll_interval;
        self.idle_interval = idle_interval;
        self.start_delay = start_delay;
        self
    }

    pub fn scope(&self) -> &KeyScope {
        &self.scope
    }

    fn keys(&self) -> Vec<String> {
        match &self.scope {
            KeyScope::All => self.queue.keys(),
            KeyScope::Fixed(keys) => keys.clone(),
        }
    }

    /// Run one poll cycle over `keys` and return how many alerts were handled.
    async fn poll_keys(&self, keys: &[String]) -> usize {
        let mut handled = 0;
        for key in keys {
            let Some(envelope) = self.queue.consume(key) else {
                continue;
            };
            debug!(cluster_id = %key, alert_id = %envelope.alert_id(), "Dispatching alert");
            handled += 1;

            let result = AssertUnwindSafe(self.handler.handle(key, envelope))
                .catch_unwind()
                .await;
            if result.is_err() {
                metrics::counter!("alertd_handler_panics_total").increment(1);
                error!(cluster_id = %key, "Alert handler panicked, continuing");
            }
        }
        handled
    }

    /// Run one cycle over the keys currently in scope.
    pub async fn poll_once(&self) -> usize {
        self.poll_keys(&self.keys()).await
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(scope = ?self.scope, "Alert consumer starting");

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Alert consumer cancelled before first cycle");
                return;
            }
            _ = tokio::time::sleep(self.start_delay) => {}
        }

        loop {
            let keys = self.keys();
            let wait = if keys.is_empty() {
                self.idle_interval
            } else {
                self.poll_keys(&keys).await;
                self.poll_interval
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Alert consumer shutting down gracefully");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

impl std::fmt::Debug for AlertConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertConsumer")
            .field("scope", &self.scope)
            .field("poll_interval", &self.poll_interval)
            .field("idle_interval", &self.idle_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InboundAlert;
    use crate::routing::KeyExtractor;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<(String, String)>>,
        panic_on: Option<String>,
    }

    impl Collecting {
        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertHandler for Collecting {
        async fn handle(&self, key: &str, envelope: AlertEnvelope) {
            if self.panic_on.as_deref() == Some(envelope.alert_id()) {
                panic!("handler blew up");
            }
            self.seen
                .lock()
                .unwrap()
                .push((key.to_string(), envelope.alert_id().to_string()));
        }
    }

    fn alert(cluster: &str, id: &str) -> InboundAlert {
        InboundAlert {
            request_body: Some(json!({
                "alertId": id,
                "alarmObjInfo": { "dimensions": { "objId": format!("r#{cluster}#x") } }
            })),
            ..InboundAlert::default()
        }
    }

    fn queue() -> AlertQueue {
        AlertQueue::new(100, KeyExtractor::default())
    }

    #[tokio::test]
    async fn poll_once_takes_one_alert_per_key() {
        let q = queue();
        q.produce(alert("cls-a", "a1"));
        q.produce(alert("cls-a", "a2"));
        q.produce(alert("cls-b", "b1"));

        let handler = Arc::new(Collecting::default());
        let consumer = AlertConsumer::new(q.clone(), handler.clone(), KeyScope::All);

        assert_eq!(consumer.poll_once().await, 2);
        assert_eq!(
            handler.seen(),
            [
                ("cls-a".to_string(), "a1".to_string()),
                ("cls-b".to_string(), "b1".to_string())
            ]
        );
        assert_eq!(consumer.poll_once().await, 1);
        assert_eq!(consumer.poll_once().await, 0);
    }

    #[tokio::test]
    async fn fixed_scope_ignores_other_keys() {
        let q = queue();
        q.produce(alert("cls-a", "a1"));
        q.produce(alert("cls-b", "b1"));

        let handler = Arc::new(Collecting::default());
        let consumer = AlertConsumer::new(
            q.clone(),
            handler.clone(),
            KeyScope::Fixed(vec!["cls-b".to_string(), "cls-unseen".to_string()]),
        );

        assert_eq!(consumer.poll_once().await, 1);
        assert_eq!(handler.seen()[0].0, "cls-b");
        assert_eq!(q.queue_size("cls-a"), 1);
    }

    #[tokio::test]
    async fn handler_panic_does_not_stop_other_keys() {
        let q = queue();
        q.produce(alert("cls-a", "bad"));
        q.produce(alert("cls-b", "good"));

        let handler = Arc::new(Collecting {
            panic_on: Some("bad".to_string()),
            ..Collecting::default()
        });
        let consumer = AlertConsumer::new(q.clone(), handler.clone(), KeyScope::All);

        assert_eq!(consumer.poll_once().await, 2);
        assert_eq!(handler.seen(), [("cls-b".to_string(), "good".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_queue_and_stops_on_cancel() {
        let q = queue();
        let handler = Arc::new(Collecting::default());
        let consumer = Arc::new(
            AlertConsumer::new(q.clone(), handler.clone(), KeyScope::All).with_intervals(
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ),
        );

        let cancel = CancellationToken::new();
        let task = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        q.produce(alert("cls-a", "a1"));
        q.produce(alert("cls-a", "a2"));

        // Nothing happens during the start delay
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(handler.seen().is_empty());

        // First cycle at 5s, second at 6s
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(handler.seen().len(), 2);
        assert_eq!(q.queue_size("cls-a"), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("consumer did not stop within one cycle")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_start_delay_exits() {
        let consumer = AlertConsumer::new(queue(), Arc::new(Collecting::default()), KeyScope::All);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(10), consumer.run(cancel))
            .await
            .unwrap();
    }

    #[test]
    fn from_config_derives_scope_from_clusters() {
        let handler: Arc<dyn AlertHandler> = Arc::new(Collecting::default());
        let all = AlertConsumer::from_config(queue(), handler.clone(), &ConsumerConfig::default());
        assert_eq!(all.scope(), &KeyScope::All);

        let config = ConsumerConfig {
            clusters: BTreeMap::from([
                ("cls-b".to_string(), "ap-beijing".to_string()),
                ("cls-a".to_string(), "ap-shanghai".to_string()),
            ]),
            ..ConsumerConfig::default()
        };
        let fixed = AlertConsumer::from_config(queue(), handler, &config);
        assert_eq!(
            fixed.scope(),
            &KeyScope::Fixed(vec!["cls-a".to_string(), "cls-b".to_string()])
        );
    }
}
