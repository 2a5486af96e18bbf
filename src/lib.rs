//! cluster-alertd - per-cluster alert queueing, analysis dispatch and
//! device notification fan-out.

pub mod cli;
pub mod config;
pub mod consumer;
pub mod context_cache;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod routing;
pub mod server;

// Re-export commonly used types
pub use cli::LogFormat;
pub use consumer::{AlertConsumer, AlertHandler, KeyScope};
pub use context_cache::{AlertContext, AlertContextCache};
pub use dispatch::{AlertDispatcher, DispatchedJob};
pub use entity::{EntityExtractor, RegexEntityExtractor};
pub use jobs::{JobContext, JobExecutor, JobKind, JobOutcome, JobRunner, RetryPolicy};
pub use metrics::{MetricsServer, register_metric_descriptions};
pub use notify::{ConnectionHub, NotificationKind, Notifier, PushNotifier};
pub use queue::{AlertEnvelope, AlertQueue, InboundAlert, QueueStatus};
pub use routing::KeyExtractor;
