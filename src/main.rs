//! cluster-alertd - per-cluster alert queueing, analysis dispatch and
//! device notification fan-out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cluster_alertd::cli::{Cli, LogFormat};
use cluster_alertd::config::{Config, RuntimeConfig};
use cluster_alertd::jobs::AgentServiceExecutor;
use cluster_alertd::server::{self, AppState};
use cluster_alertd::{
    AlertConsumer, AlertContextCache, AlertDispatcher, AlertQueue, ConnectionHub, JobRunner,
    KeyExtractor, MetricsServer, PushNotifier, RegexEntityExtractor, RetryPolicy,
};

/// Initialize the tracing subscriber with the specified log format.
fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    info!(config_path = %cli.config.display(), "Loading configuration");

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "Failed to load configuration");
            std::process::exit(1);
        }
    };

    info!("Validating configuration");
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "Configuration validation error");
        }
        error!(error_count = errors.len(), "Configuration validation failed");
        std::process::exit(1);
    }

    if cli.validate {
        println!("Configuration is valid: {}", cli.config.display());
        println!("  Listen: {}", config.server.listen);
        println!("  Queue capacity per cluster: {}", config.queue.capacity);
        if config.consumer.clusters.is_empty() {
            println!("  Clusters: all seen");
        } else {
            println!("  Clusters: {}", config.consumer.clusters.len());
        }
        println!("  Agent: {} ({})", config.agent.url, config.agent.model);
        println!(
            "  Jobs: {} attempts, on shutdown {:?}",
            config.jobs.max_attempts, config.jobs.on_shutdown
        );
        println!(
            "  Metrics: {} (port {})",
            if config.metrics.enabled {
                "enabled"
            } else {
                "disabled"
            },
            config.metrics.port
        );
        return Ok(());
    }

    let runtime_config = config.compile()?;

    info!(config_path = %cli.config.display(), "cluster-alertd starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(runtime_config))
}

/// Main async entry point.
async fn run(config: RuntimeConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    let metrics_handle = if config.metrics.enabled {
        let server = MetricsServer::new(config.metrics.port);
        let cancel_metrics = cancel.clone();
        info!(port = config.metrics.port, "Starting metrics server");
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(cancel_metrics).await {
                error!(error = %e, "Metrics server error");
            }
        }))
    } else {
        info!("Metrics server disabled");
        None
    };

    let queue = AlertQueue::new(
        config.queue_capacity,
        KeyExtractor::from_config(&config.routing),
    );
    let notifier = Arc::new(PushNotifier::from_settings(&config.push)?);
    let cache = AlertContextCache::from_config(&config.context_cache);

    let executor = Arc::new(AgentServiceExecutor::new(
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?,
    ));
    let runner = JobRunner::new(
        executor,
        notifier.clone(),
        cache.clone(),
        RetryPolicy::from_config(&config.jobs),
    )
    .with_entity_extractor(Arc::new(RegexEntityExtractor::new(
        config.entity_patterns.clone(),
    )))
    .with_verify_delay(config.jobs.verify_delay)
    .with_markers(config.jobs.no_conclusion_markers.clone());

    let dispatcher = Arc::new(AlertDispatcher::from_config(
        runner.clone(),
        notifier,
        cache,
        &config,
    ));

    let consumer = AlertConsumer::from_config(queue.clone(), dispatcher.clone(), &config.consumer);
    let consumer_cancel = cancel.clone();
    let consumer_handle = tokio::spawn(async move {
        consumer.run(consumer_cancel).await;
    });

    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c signal");
            return;
        }
        info!("Received shutdown signal, initiating graceful shutdown");
        cancel_signal.cancel();
    });

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    // Devices attached to this process; `/push` delivers through it.
    let hub = Arc::new(ConnectionHub::default());
    let state = AppState {
        queue,
        dispatcher,
        hub,
    };
    let server_result = server::serve(listener, state, cancel.clone()).await;

    // The server can also exit on its own error; stop everything else too.
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), consumer_handle).await;
    runner
        .shutdown(config.jobs.on_shutdown, config.jobs.drain_timeout)
        .await;

    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    match server_result {
        Ok(()) => {
            info!("cluster-alertd shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "HTTP server error");
            Err(anyhow::anyhow!("HTTP server error: {}", e))
        }
    }
}
