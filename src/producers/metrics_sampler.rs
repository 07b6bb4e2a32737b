//! Host metrics sampler. Ticks on an interval, reads OS
//! counters via `sysinfo`, and emits `metric` events once a second sample
//! makes a delta computation possible.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Disks, Networks, System};
use tokio::sync::watch;

use crate::buffer::Buffer;
use crate::error::ProducerError;
use crate::event::Event;
use crate::scrubber::Scrubber;

use super::GlobalTags;

const ROOT_MOUNT: &str = "/";
const LOOPBACK_PREFIXES: &[&str] = &["lo"];

struct RawSample {
    at: Instant,
    cpu_usage_percent: f32,
    mem_total: u64,
    mem_used: u64,
    disk_total: u64,
    disk_used: u64,
    net_rx: u64,
    net_tx: u64,
}

pub struct MetricsSamplerConfig {
    pub interval: Duration,
    pub global_tags: GlobalTags,
}

/// Host counter sampler. Construction fails with
/// [`ProducerError::NotSupported`] when this platform exposes none of the
/// counters this sampler needs, so the collector gets skipped rather than
/// spawned.
pub struct MetricsSampler {
    config: MetricsSamplerConfig,
    system: System,
    disks: Disks,
    networks: Networks,
    previous: Option<RawSample>,
}

impl MetricsSampler {
    pub fn new(config: MetricsSamplerConfig) -> Result<Self, ProducerError> {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let disks = Disks::new_with_refreshed_list();
        let networks = Networks::new_with_refreshed_list();

        if disks.list().is_empty() && system.total_memory() == 0 {
            return Err(ProducerError::NotSupported);
        }

        Ok(Self {
            config,
            system,
            disks,
            networks,
            previous: None,
        })
    }

    fn sample(&mut self) -> RawSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);

        let cpu_usage_percent = self.system.global_cpu_usage();
        let mem_total = self.system.total_memory();
        let mem_used = mem_total.saturating_sub(self.system.available_memory());

        let (disk_total, disk_used) = self
            .disks
            .list()
            .iter()
            .find(|d| d.mount_point().to_string_lossy() == ROOT_MOUNT)
            .map(|d| {
                let total = d.total_space();
                let used = total.saturating_sub(d.available_space());
                (total, used)
            })
            .unwrap_or((0, 0));

        let (net_rx, net_tx) = self
            .networks
            .iter()
            .filter(|(name, _)| !LOOPBACK_PREFIXES.iter().any(|p| name.starts_with(p)))
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        RawSample {
            at: Instant::now(),
            cpu_usage_percent,
            mem_total,
            mem_used,
            disk_total,
            disk_used,
            net_rx,
            net_tx,
        }
    }

    /// One metric event with the global tag overlay plus a `unit` tag.
    fn metric_event(&self, name: &str, value: f64, unit: &str) -> Event {
        let mut event = Event {
            header: crate::event::EventHeader::new("host", "host"),
            body: crate::event::EventBody::Metric {
                metric_name: name.to_string(),
                metric_value: value,
            },
        };
        event.header.tags.insert("unit".to_string(), unit.to_string());
        self.config.global_tags.merge_into(&mut event.header.tags);
        event
    }

    fn emit(&self, buffer: &Buffer, scrubber: &Scrubber, name: &str, value: f64, unit: &str) {
        let mut event = self.metric_event(name, value, unit);
        if scrubber.apply(&mut event) {
            buffer.add(event);
        }
    }

    fn emit_with_tag(
        &self,
        buffer: &Buffer,
        scrubber: &Scrubber,
        name: &str,
        value: f64,
        unit: &str,
        tag_key: &str,
        tag_value: &str,
    ) {
        let mut event = self.metric_event(name, value, unit);
        event
            .header
            .tags
            .insert(tag_key.to_string(), tag_value.to_string());
        if scrubber.apply(&mut event) {
            buffer.add(event);
        }
    }

    fn tick(&mut self, buffer: &Buffer, scrubber: &Scrubber) {
        let current = self.sample();

        if current.mem_total > 0 {
            self.emit(
                buffer,
                scrubber,
                "host.memory.usage_percent",
                100.0 * current.mem_used as f64 / current.mem_total as f64,
                "percent",
            );
            self.emit(
                buffer,
                scrubber,
                "host.memory.used_bytes",
                current.mem_used as f64,
                "bytes",
            );
            self.emit(
                buffer,
                scrubber,
                "host.memory.total_bytes",
                current.mem_total as f64,
                "bytes",
            );
        }

        if current.disk_total > 0 {
            self.emit_with_tag(
                buffer,
                scrubber,
                "host.disk.usage_percent",
                100.0 * current.disk_used as f64 / current.disk_total as f64,
                "percent",
                "path",
                ROOT_MOUNT,
            );
            self.emit_with_tag(
                buffer,
                scrubber,
                "host.disk.used_bytes",
                current.disk_used as f64,
                "bytes",
                "path",
                ROOT_MOUNT,
            );
        }

        self.emit(
            buffer,
            scrubber,
            "host.cpu.usage_percent",
            current.cpu_usage_percent as f64,
            "percent",
        );

        if let Some(prev) = &self.previous {
            let elapsed = current.at.saturating_duration_since(prev.at).as_secs_f64();
            if elapsed > 0.0 {
                let rx_rate = current.net_rx.saturating_sub(prev.net_rx) as f64 / elapsed;
                let tx_rate = current.net_tx.saturating_sub(prev.net_tx) as f64 / elapsed;
                self.emit(
                    buffer,
                    scrubber,
                    "host.net.rx_bytes_per_sec",
                    rx_rate,
                    "bytes_per_sec",
                );
                self.emit(
                    buffer,
                    scrubber,
                    "host.net.tx_bytes_per_sec",
                    tx_rate,
                    "bytes_per_sec",
                );
            }
        }

        self.previous = Some(current);
    }

    pub async fn run(mut self, buffer: Arc<Buffer>, scrubber: Arc<Scrubber>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&buffer, &scrubber);
                }
                _ = stop.changed() => return,
            }
            if *stop.borrow() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;

    fn sampler() -> MetricsSampler {
        MetricsSampler::new(MetricsSamplerConfig {
            interval: Duration::from_secs(30),
            global_tags: GlobalTags::default(),
        })
        .expect("sysinfo should be supported in test environment")
    }

    #[test]
    fn first_tick_emits_absolute_metrics_but_no_rate_metrics() {
        let mut sampler = sampler();
        let buffer = Buffer::new(100);
        let scrubber = Scrubber::empty();
        sampler.tick(&buffer, &scrubber);
        let events = buffer.flush();
        assert!(events
            .iter()
            .any(|e| matches!(&e.body, EventBody::Metric { metric_name, .. } if metric_name == "host.cpu.usage_percent")));
        assert!(!events
            .iter()
            .any(|e| matches!(&e.body, EventBody::Metric { metric_name, .. } if metric_name == "host.net.rx_bytes_per_sec")));
    }

    #[test]
    fn second_tick_adds_network_rate_metrics() {
        let mut sampler = sampler();
        let buffer = Buffer::new(100);
        let scrubber = Scrubber::empty();
        sampler.tick(&buffer, &scrubber);
        buffer.flush();
        std::thread::sleep(Duration::from_millis(10));
        sampler.tick(&buffer, &scrubber);
        let events = buffer.flush();
        assert!(events
            .iter()
            .any(|e| matches!(&e.body, EventBody::Metric { metric_name, .. } if metric_name == "host.net.rx_bytes_per_sec")));
    }
}
