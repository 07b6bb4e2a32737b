//! StatsD-protocol UDP listener.
//!
//! `name:value|type[|@sampleRate][|#tag,tag:v,...]`, one metric event per
//! line. Gauge delta handling (`+`/`-` prefixed values) is config-gated --
//! see [`StatsDServerConfig::gauge_deltas`] -- since the source protocol
//! description only "notes" the convention without mandating aggregation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::event::{Event, EventBody, EventHeader};
use crate::scrubber::Scrubber;

use super::GlobalTags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
    Timing,
    Set,
}

impl MetricKind {
    fn parse(raw: &str) -> Option<MetricKind> {
        match raw {
            "c" => Some(MetricKind::Counter),
            "g" => Some(MetricKind::Gauge),
            "ms" | "h" => Some(MetricKind::Timing),
            "s" => Some(MetricKind::Set),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "c",
            MetricKind::Gauge => "g",
            MetricKind::Timing => "ms",
            MetricKind::Set => "s",
        }
    }
}

struct ParsedLine {
    name: String,
    value: String,
    kind: MetricKind,
    sample_rate: Option<f64>,
    tags: HashMap<String, String>,
}

fn parse_line(line: &str) -> Option<ParsedLine> {
    let (name_value, rest) = line.split_once('|')?;
    let (name, value) = name_value.split_once(':')?;
    if name.is_empty() {
        return None;
    }

    let mut parts = rest.split('|');
    let kind = MetricKind::parse(parts.next()?)?;
    let mut sample_rate = None;
    let mut tags = HashMap::new();

    for part in parts {
        if let Some(rate) = part.strip_prefix('@') {
            sample_rate = rate.parse::<f64>().ok();
        } else if let Some(tag_list) = part.strip_prefix('#') {
            for tag in tag_list.split(',') {
                if let Some((k, v)) = tag.split_once(':') {
                    tags.insert(k.to_string(), v.to_string());
                } else if !tag.is_empty() {
                    tags.insert(tag.to_string(), "true".to_string());
                }
            }
        }
    }

    Some(ParsedLine {
        name: name.to_string(),
        value: value.to_string(),
        kind,
        sample_rate,
        tags,
    })
}

/// Returns `(magnitude, is_delta)`: `is_delta` is true when the raw value
/// carried an explicit `+`/`-` sign, the statsd gauge-adjustment convention.
fn parse_gauge_value(raw: &str) -> (f64, bool) {
    if let Some(rest) = raw.strip_prefix('+') {
        (rest.parse().unwrap_or(0.0), true)
    } else if raw.starts_with('-') {
        (raw.parse().unwrap_or(0.0), true)
    } else {
        (raw.parse().unwrap_or(0.0), false)
    }
}

pub struct StatsDServerConfig {
    pub bind_addr: String,
    pub namespace: Option<String>,
    pub global_tags: GlobalTags,
    pub config_tags: HashMap<String, String>,
    /// Deliberate choice: when true, `+N`/`-N` gauge values
    /// accumulate onto the last observed value for that metric name;
    /// when false (default), the numeric value is emitted as-is.
    pub gauge_deltas: bool,
}

struct GaugeState {
    last_values: Mutex<HashMap<String, f64>>,
    set_members: Mutex<HashMap<String, HashSet<String>>>,
}

pub struct StatsDServer {
    config: StatsDServerConfig,
    gauges: GaugeState,
}

impl StatsDServer {
    pub fn new(config: StatsDServerConfig) -> Self {
        Self {
            config,
            gauges: GaugeState {
                last_values: Mutex::new(HashMap::new()),
                set_members: Mutex::new(HashMap::new()),
            },
        }
    }

    fn qualify_name(&self, name: &str) -> String {
        match &self.config.namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}.{name}"),
            _ => name.to_string(),
        }
    }

    fn resolve_value(&self, name: &str, parsed: &ParsedLine) -> f64 {
        match parsed.kind {
            MetricKind::Counter => {
                let base: f64 = parsed.value.parse().unwrap_or(0.0);
                match parsed.sample_rate {
                    Some(rate) if rate > 0.0 => base / rate,
                    _ => base,
                }
            }
            MetricKind::Gauge => {
                let (magnitude, is_delta) = parse_gauge_value(&parsed.value);
                if self.config.gauge_deltas && is_delta {
                    let mut last = self.gauges.last_values.lock().unwrap();
                    let updated = last.get(name).copied().unwrap_or(0.0) + magnitude;
                    last.insert(name.to_string(), updated);
                    updated
                } else {
                    let mut last = self.gauges.last_values.lock().unwrap();
                    last.insert(name.to_string(), magnitude);
                    magnitude
                }
            }
            MetricKind::Timing => parsed.value.parse().unwrap_or(0.0),
            MetricKind::Set => {
                let mut members = self.gauges.set_members.lock().unwrap();
                let set = members.entry(name.to_string()).or_default();
                set.insert(parsed.value.clone());
                set.len() as f64
            }
        }
    }

    fn build_event(&self, parsed: ParsedLine) -> Event {
        let qualified_name = self.qualify_name(&parsed.name);
        let value = self.resolve_value(&qualified_name, &parsed);

        let mut event = Event {
            header: EventHeader::new("statsd", "statsd"),
            body: EventBody::Metric {
                metric_name: qualified_name,
                metric_value: value,
            },
        };
        event
            .header
            .tags
            .insert("statsd_type".to_string(), parsed.kind.as_str().to_string());
        for (k, v) in parsed.tags {
            event.header.tags.entry(k).or_insert(v);
        }
        for (k, v) in &self.config.config_tags {
            event.header.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self.config.global_tags.merge_into(&mut event.header.tags);
        event
    }

    fn handle_datagram(&self, data: &[u8], buffer: &Buffer, scrubber: &Scrubber) {
        let text = String::from_utf8_lossy(data);
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(parsed) = parse_line(line) else {
                debug!(line, "unparseable statsd line");
                continue;
            };
            let mut event = self.build_event(parsed);
            if scrubber.apply(&mut event) {
                buffer.add(event);
            }
        }
    }

    pub async fn run(
        self: Arc<Self>,
        buffer: Arc<Buffer>,
        scrubber: Arc<Scrubber>,
        mut stop: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let socket = UdpSocket::bind(&self.config.bind_addr).await?;
        let mut buf = vec![0u8; 65536];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, _addr)) => self.handle_datagram(&buf[..n], &buffer, &scrubber),
                        Err(err) => warn!(error = %err, "statsd recv error"),
                    }
                }
                _ = stop.changed() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if *stop.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(gauge_deltas: bool) -> StatsDServer {
        StatsDServer::new(StatsDServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            namespace: None,
            global_tags: GlobalTags::default(),
            config_tags: HashMap::new(),
            gauge_deltas,
        })
    }

    #[test]
    fn counter_applies_sample_rate() {
        let parsed = parse_line("requests:1|c|@0.1").unwrap();
        let server = server(false);
        assert_eq!(server.resolve_value("requests", &parsed), 10.0);
    }

    #[test]
    fn gauge_default_mode_uses_value_as_is() {
        let parsed = parse_line("queue.depth:42|g").unwrap();
        let server = server(false);
        assert_eq!(server.resolve_value("queue.depth", &parsed), 42.0);
    }

    #[test]
    fn gauge_delta_mode_accumulates() {
        let server = server(true);
        let first = parse_line("queue.depth:5|g").unwrap();
        assert_eq!(server.resolve_value("queue.depth", &first), 5.0);
        let delta = parse_line("queue.depth:+3|g").unwrap();
        assert_eq!(server.resolve_value("queue.depth", &delta), 8.0);
    }

    #[test]
    fn namespace_prefixes_metric_name() {
        let server = StatsDServer::new(StatsDServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            namespace: Some("app".to_string()),
            global_tags: GlobalTags::default(),
            config_tags: HashMap::new(),
            gauge_deltas: false,
        });
        assert_eq!(server.qualify_name("requests"), "app.requests");
    }

    #[test]
    fn packet_tags_and_statsd_type_are_set() {
        let server = server(false);
        let parsed = parse_line("hits:1|c|#env:prod,region:us").unwrap();
        let event = server.build_event(parsed);
        if let EventBody::Metric { metric_name, .. } = &event.body {
            assert_eq!(metric_name, "hits");
        }
        assert_eq!(event.header.tags.get("env").unwrap(), "prod");
        assert_eq!(event.header.tags.get("statsd_type").unwrap(), "c");
    }

    #[test]
    fn set_type_counts_unique_members() {
        let server = server(false);
        let a = parse_line("uniques:user1|s").unwrap();
        let b = parse_line("uniques:user2|s").unwrap();
        let c = parse_line("uniques:user1|s").unwrap();
        assert_eq!(server.resolve_value("uniques", &a), 1.0);
        assert_eq!(server.resolve_value("uniques", &b), 2.0);
        assert_eq!(server.resolve_value("uniques", &c), 2.0);
    }

    #[test]
    fn malformed_lines_are_ignored() {
        assert!(parse_line("no-pipe-here").is_none());
        assert!(parse_line("name:value|unknown").is_none());
    }
}
