//! Per-cluster bounded alert queues.
//!
//! One FIFO per routing key, created lazily on the first alert for that key
//! and never removed. Each queue sits behind its own mutex so producers and
//! consumers working on different clusters never contend; the outer map is
//! only write-locked when a new key appears.
//!
//! When a queue is full the oldest alert is evicted so ingestion never
//! blocks. Evictions are counted and visible through [`AlertQueue::status`].

use crate::routing::KeyExtractor;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Alert as received by the ingestion boundary.
///
/// Only `request_body` matters for routing; the rest is kept for audit and
/// handed to the analysis job untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundAlert {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub remote_addr: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub request_body: Option<Value>,
}

/// A queued alert together with the routing key it was filed under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEnvelope {
    pub key: String,
    pub alert: InboundAlert,
}

impl AlertEnvelope {
    /// Alert identifier from the monitoring platform, or `"unknown"`.
    pub fn alert_id(&self) -> &str {
        self.body_str("/alertId")
    }

    /// Name of the alarm policy that fired, or `"unknown"`.
    pub fn policy_name(&self) -> &str {
        self.body_str("/alarmPolicyInfo/policyName")
    }

    fn body_str(&self, pointer: &str) -> &str {
        self.alert
            .request_body
            .as_ref()
            .and_then(|body| body.pointer(pointer))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }
}

/// Per-key entry in a [`QueueStatus`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub queue_size: usize,
    pub max_size: usize,
}

/// Point-in-time view of every queue and the aggregate counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total_alerts_queued: usize,
    pub per_key: BTreeMap<String, KeyStatus>,
    pub total_produced: u64,
    pub total_consumed: u64,
    pub total_evicted: u64,
    pub distinct_keys_seen: usize,
    pub uptime_seconds: u64,
}

type Slot = Arc<Mutex<VecDeque<AlertEnvelope>>>;

struct Inner {
    queues: RwLock<BTreeMap<String, Slot>>,
    capacity: usize,
    extractor: KeyExtractor,
    total_produced: AtomicU64,
    total_consumed: AtomicU64,
    total_evicted: AtomicU64,
    started: Instant,
}

/// Registry of per-cluster bounded queues.
///
/// Cheap to clone; every clone shares the same queues and counters.
#[derive(Clone)]
pub struct AlertQueue {
    inner: Arc<Inner>,
}

fn lock(slot: &Slot) -> MutexGuard<'_, VecDeque<AlertEnvelope>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AlertQueue {
    /// Create an empty registry. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize, extractor: KeyExtractor) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: RwLock::new(BTreeMap::new()),
                capacity: capacity.max(1),
                extractor,
                total_produced: AtomicU64::new(0),
                total_consumed: AtomicU64::new(0),
                total_evicted: AtomicU64::new(0),
                started: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// File an alert under its routing key.
    ///
    /// Returns `false` without touching any queue when no key can be
    /// extracted. On overflow the oldest alert for that key is evicted.
    pub fn produce(&self, alert: InboundAlert) -> bool {
        let Some(key) = self.inner.extractor.extract(&alert) else {
            counter!("alertd_alerts_unroutable_total").increment(1);
            debug!(path = %alert.path, "alert has no routing key, not queued");
            return false;
        };

        let slot = self.slot_for(&key);
        let mut queue = lock(&slot);

        if queue.len() >= self.inner.capacity
            && let Some(evicted) = queue.pop_front()
        {
            self.inner.total_evicted.fetch_add(1, Ordering::Relaxed);
            counter!("alertd_alerts_dropped_total", "cluster_id" => key.clone()).increment(1);
            warn!(
                cluster_id = %key,
                alert_id = %evicted.alert_id(),
                capacity = self.inner.capacity,
                "queue full, evicted oldest alert"
            );
        }

        queue.push_back(AlertEnvelope {
            key: key.clone(),
            alert,
        });
        self.inner.total_produced.fetch_add(1, Ordering::Relaxed);

        counter!("alertd_alerts_produced_total").increment(1);
        gauge!("alertd_queue_size", "cluster_id" => key.clone()).set(queue.len() as f64);
        debug!(cluster_id = %key, queue_size = queue.len(), "alert queued");
        true
    }

    /// Pop the oldest alert for `key` without waiting.
    pub fn consume(&self, key: &str) -> Option<AlertEnvelope> {
        let slot = self.slot(key)?;
        let mut queue = lock(&slot);
        let envelope = queue.pop_front()?;

        self.inner.total_consumed.fetch_add(1, Ordering::Relaxed);
        counter!("alertd_alerts_consumed_total").increment(1);
        gauge!("alertd_queue_size", "cluster_id" => key.to_string()).set(queue.len() as f64);
        Some(envelope)
    }

    /// Current length of the queue for `key` (0 if the key was never seen).
    pub fn queue_size(&self, key: &str) -> usize {
        self.slot(key).map(|slot| lock(&slot).len()).unwrap_or(0)
    }

    /// Every routing key seen so far, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of all queues and counters.
    ///
    /// Every per-key lock is held while reading, so the sizes and counters
    /// describe a single moment even while producers and consumers run.
    pub fn status(&self) -> QueueStatus {
        let queues = self
            .inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let guards: Vec<_> = queues.iter().map(|(key, slot)| (key, lock(slot))).collect();

        let per_key: BTreeMap<String, KeyStatus> = guards
            .iter()
            .map(|(key, queue)| {
                (
                    (*key).clone(),
                    KeyStatus {
                        queue_size: queue.len(),
                        max_size: self.inner.capacity,
                    },
                )
            })
            .collect();

        QueueStatus {
            total_alerts_queued: per_key.values().map(|s| s.queue_size).sum(),
            distinct_keys_seen: per_key.len(),
            per_key,
            total_produced: self.inner.total_produced.load(Ordering::Relaxed),
            total_consumed: self.inner.total_consumed.load(Ordering::Relaxed),
            total_evicted: self.inner.total_evicted.load(Ordering::Relaxed),
            uptime_seconds: self.inner.started.elapsed().as_secs(),
        }
    }

    fn slot(&self, key: &str) -> Option<Slot> {
        self.inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn slot_for(&self, key: &str) -> Slot {
        if let Some(slot) = self.slot(key) {
            return slot;
        }
        self.inner
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for AlertQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertQueue")
            .field("capacity", &self.inner.capacity)
            .field("keys", &self.keys().len())
            .finish()
    }
}
