// sidecar-agent: a host-resident telemetry agent.
//
// Observes an application running on the same machine -- log files, host
// metrics, StatsD traffic, reverse-proxied HTTP requests -- normalizes what
// it sees into one event model, and delivers it at-least-once to a remote
// ingest API and/or a local embedded analytical database.
//
// Architecture:
// - Producers (log tailers, journald tailer, metrics sampler, StatsD
//   listener, HTTP proxy capturer) each run on their own task and feed a
//   shared bounded Buffer.
// - A Flusher task periodically drains the on-disk spill queue, flushes the
//   buffer, and dual-writes to the forwarder (remote) and analytics writer
//   (local).
// - A small health endpoint exposes /health and /metrics for operators.

mod analytics;
mod buffer;
mod config;
mod diagnostics;
mod diskqueue;
mod error;
mod event;
mod flusher;
mod forwarder;
mod health;
mod logging;
mod parsers;
mod pipeline;
mod producers;
mod retention;
mod scrubber;
pub mod util;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use analytics::{AnalyticsWriter, AnalyticsWriterConfig};
use buffer::Buffer;
use config::Config;
use diagnostics::Diagnostics;
use diskqueue::DiskQueue;
use flusher::{Flusher, FlusherConfig};
use forwarder::{Forwarder, ForwarderConfig};
use pipeline::Pipeline;
use producers::journald_tailer::{JournaldTailer, JournaldTailerConfig};
use producers::log_tailer::{LogTailer, LogTailerConfig};
use producers::metrics_sampler::{MetricsSampler, MetricsSamplerConfig};
use producers::proxy_capturer::{self, ProxyCapturerConfig};
use producers::statsd_server::{StatsDServer, StatsDServerConfig};
use producers::GlobalTags;
use scrubber::{Scrubber, ScrubRule};

/// Normalize a `host:port`-or-`:port` listen address (`metrics.statsd.listen_addr`
/// defaults to `:8125`) into something
/// [`tokio::net::UdpSocket::bind`]/[`tokio::net::TcpListener::bind`] accept.
fn normalize_bind_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let _logging_guard = logging::init(&config.logging);
    info!(
        service = %config.service_name,
        environment = %config.environment,
        remote_enabled = config.remote_enabled(),
        "sidecar-agent starting"
    );

    // --- Scrubber: compile the configured ruleset once at startup. ---
    let mut scrub_rules = Vec::with_capacity(config.scrubbing.rules.len());
    if config.scrubbing.enabled {
        for rule in &config.scrubbing.rules {
            match ScrubRule::from_config(rule) {
                Ok(compiled) => scrub_rules.push(compiled),
                Err(err) => {
                    error!(rule = %rule.name, error = %err, "invalid scrubbing rule pattern, skipping");
                }
            }
        }
    }
    let scrubber = Arc::new(Scrubber::new(scrub_rules));

    // --- Shared pipeline state. ---
    let buffer = Arc::new(Buffer::new(config.buffer_size));
    let diagnostics = Arc::new(Diagnostics::new());
    let disk_queue = Arc::new(
        DiskQueue::open(config.queue_dir.clone())
            .with_context(|| format!("failed to open disk queue at {}", config.queue_dir.display()))?,
    );

    let forwarder = if config.remote_enabled() {
        let endpoint = config
            .api_endpoint
            .clone()
            .context("api_key is set but api_endpoint is missing")?;
        Some(Arc::new(
            Forwarder::new(ForwarderConfig {
                endpoint,
                api_key: config.api_key.clone().unwrap_or_default(),
                batch_size: config.delivery.batch_size,
                compress: config.delivery.compress,
                max_batch_bytes: config.delivery.max_batch_bytes,
            })
            .context("failed to build forwarder HTTP client")?,
        ))
    } else {
        info!("no api_key configured, running local-only");
        None
    };

    let analytics_writer = if config.analytics.enabled {
        match AnalyticsWriter::open(AnalyticsWriterConfig {
            database_path: config.analytics.database_path.clone(),
            retention_days: config.analytics.retention_days,
            max_size_gb: config.analytics.max_size_gb,
        }) {
            Ok(writer) => {
                info!(path = %config.analytics.database_path.display(), "local analytics store opened");
                Some(Arc::new(writer))
            }
            Err(err) => {
                error!(error = %err, "failed to open local analytics store, disabling");
                None
            }
        }
    } else {
        None
    };

    let pipeline = Pipeline {
        buffer: buffer.clone(),
        scrubber: scrubber.clone(),
        diagnostics: diagnostics.clone(),
        disk_queue: disk_queue.clone(),
        forwarder: forwarder.clone(),
        analytics: analytics_writer.clone(),
    };

    // --- Stop signal shared by every producer task, the flusher, and the
    // health endpoint. A single `watch` channel, mirroring the same
    // `shutdown_tx`/`shutdown_rx` pair. ---
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut producer_handles = Vec::new();
    let global_tags = GlobalTags(config.tags.clone());

    // --- Log tailers. ---
    for log_source in &config.logs {
        if log_source.format.eq_ignore_ascii_case("journald") {
            match JournaldTailer::new(JournaldTailerConfig {
                unit_filter: None,
                service_name: config.service_name.clone(),
                environment: config.environment.clone(),
                global_tags: global_tags.clone(),
            }) {
                Ok(tailer) => {
                    let buffer = buffer.clone();
                    let scrubber = scrubber.clone();
                    let stop_rx = stop_rx.clone();
                    producer_handles.push(tokio::spawn(async move {
                        tailer.run(buffer, scrubber, stop_rx).await;
                    }));
                }
                Err(err) => {
                    warn!(error = %err, "journald tailer not available, skipping");
                }
            }
            continue;
        }

        let Some(format) = parsers::Format::from_config_str(&log_source.format) else {
            error!(format = %log_source.format, path = %log_source.path, "unknown log format, skipping source");
            continue;
        };

        let tailer = LogTailer::new(
            LogTailerConfig {
                path: log_source.path.clone().into(),
                format,
                service_name: config.service_name.clone(),
                environment: config.environment.clone(),
                global_tags: global_tags.clone(),
            },
            buffer.clone(),
            scrubber.clone(),
        );
        let stop_rx = stop_rx.clone();
        producer_handles.push(tokio::spawn(async move {
            tailer.run(stop_rx).await;
        }));
    }

    // --- Host metrics sampler. ---
    if config.metrics.enabled {
        match MetricsSampler::new(MetricsSamplerConfig {
            interval: config.metrics.interval,
            global_tags: GlobalTags(config.metrics.tags.clone()),
        }) {
            Ok(sampler) => {
                let buffer = buffer.clone();
                let scrubber = scrubber.clone();
                let stop_rx = stop_rx.clone();
                producer_handles.push(tokio::spawn(async move {
                    sampler.run(buffer, scrubber, stop_rx).await;
                }));
            }
            Err(err) => {
                warn!(error = %err, "host metrics sampler not supported on this platform, skipping");
            }
        }
    }

    // --- StatsD listener. ---
    if config.metrics.statsd.enabled {
        let server = Arc::new(StatsDServer::new(StatsDServerConfig {
            bind_addr: normalize_bind_addr(&config.metrics.statsd.listen_addr),
            namespace: config.metrics.statsd.namespace.clone(),
            global_tags: global_tags.clone(),
            config_tags: config.metrics.statsd.tags.clone(),
            gauge_deltas: config.metrics.statsd.gauge_deltas,
        }));
        let buffer = buffer.clone();
        let scrubber = scrubber.clone();
        let stop_rx = stop_rx.clone();
        producer_handles.push(tokio::spawn(async move {
            if let Err(err) = server.run(buffer, scrubber, stop_rx).await {
                error!(error = %err, "statsd listener exited with error");
            }
        }));
    }

    // --- HTTP reverse-proxy capturer. ---
    if config.proxy.enabled {
        let proxy_config = ProxyCapturerConfig {
            bind_addr: format!("0.0.0.0:{}", config.proxy.listen_port),
            upstream_url: config.proxy.upstream_url.clone(),
            service_name: config.service_name.clone(),
            environment: config.environment.clone(),
            global_tags: global_tags.clone(),
        };
        let buffer = buffer.clone();
        let scrubber = scrubber.clone();
        let stop_rx = stop_rx.clone();
        producer_handles.push(tokio::spawn(async move {
            if let Err(err) = proxy_capturer::run(proxy_config, buffer, scrubber, stop_rx).await {
                error!(error = %err, "proxy capturer exited with error");
            }
        }));
    }

    // --- Health endpoint. ---
    let health_handle = config.health_port.map(|port| {
        let pipeline = pipeline.clone();
        let service_name = config.service_name.clone();
        let stop_rx = stop_rx.clone();
        tokio::spawn(async move {
            if let Err(err) = health::run(pipeline, service_name, port, stop_rx).await {
                error!(error = %err, "health endpoint exited with error");
            }
        })
    });

    // --- Flusher: the one coordinator task draining the disk queue and
    // dual-writing the buffer on every tick. ---
    let flusher = Flusher::new(
        FlusherConfig {
            flush_interval: config.flush_interval,
            queue_retention: config.delivery.queue_retention,
            dead_letter_retention: config.delivery.dead_letter_retention,
            remote_enabled: config.remote_enabled(),
            organization_id: config.organization_id.clone(),
        },
        buffer.clone(),
        disk_queue.clone(),
        forwarder.clone(),
        analytics_writer.clone(),
        diagnostics.clone(),
    );
    let flusher_handle = tokio::spawn(flusher.run(stop_rx.clone()));

    info!("sidecar-agent running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Graceful shutdown order: producers first, so nothing feeds
    // the buffer while it's draining; then the flusher's final synchronous
    // flush; then the analytics writer's drain; then the health endpoint.
    let _ = stop_tx.send(true);

    for handle in producer_handles {
        let _ = handle.await;
    }
    info!("producers stopped");

    let _ = flusher_handle.await;
    info!("flusher finished final flush");

    if let Some(analytics) = &analytics_writer {
        analytics.close();
        info!("analytics writer drained");
    }

    if let Some(handle) = health_handle {
        let _ = handle.await;
    }

    info!("shutdown complete");
    Ok(())
}
