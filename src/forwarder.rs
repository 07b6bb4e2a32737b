//! HTTP ingest forwarder: batching, optional compression, retries.
//!
//! Client construction mirrors a reverse-proxy client
//! (`reqwest::Client::builder().timeout(...).pool_max_idle_per_host(...)`);
//! the retry loop is hand-written against a specific status-code taxonomy
//! (401 fatal, 429/5xx/network retryable, everything else non-retryable) --
//! no retry-helper crate in this codebase's dependency stack implements
//! that exact shape.

use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::warn;

use crate::error::ForwarderError;
use crate::event::{Event, EventBody, Level};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub endpoint: String,
    pub api_key: String,
    pub batch_size: usize,
    pub compress: bool,
    /// `0` disables the size bound.
    pub max_batch_bytes: usize,
}

#[derive(Serialize)]
struct Envelope<'a> {
    events: &'a [Event],
}

/// Outcome of one [`Forwarder::send`] call, used by the flusher/tests to
/// report diagnostics without re-deriving them from the error type.
pub struct SendOutcome {
    pub events_sent: usize,
    pub latency: Duration,
}

pub struct Forwarder {
    client: reqwest::Client,
    config: ForwarderConfig,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self, ForwarderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ForwarderError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Normalize, partition, and send every event. Fails the whole call
    /// (no partial send) if any event is invalid.
    pub async fn send(&self, mut events: Vec<Event>) -> Result<SendOutcome, ForwarderError> {
        for event in &mut events {
            event.normalize()?;
        }

        let started = Instant::now();
        let mut sent = 0usize;
        for batch in partition_batches(events, self.config.batch_size, self.config.max_batch_bytes)
        {
            sent += batch.len();
            self.send_batch_with_retry(&batch).await?;
        }
        Ok(SendOutcome {
            events_sent: sent,
            latency: started.elapsed(),
        })
    }

    async fn send_batch_with_retry(&self, batch: &[Event]) -> Result<(), ForwarderError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_batch_once(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_fatal() => return Err(err.into_forwarder_error()),
                Err(err) if !err.retryable || attempt >= MAX_ATTEMPTS => {
                    return Err(err.into_forwarder_error())
                }
                Err(_) => {
                    tokio::time::sleep(BACKOFFS[(attempt - 1) as usize]).await;
                }
            }
        }
    }

    async fn send_batch_once(&self, batch: &[Event]) -> Result<(), SendError> {
        let body = serde_json::to_vec(&Envelope { events: batch })
            .map_err(|e| SendError::transport(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        let body = if self.config.compress {
            request = request.header(reqwest::header::CONTENT_ENCODING, "gzip");
            gzip(&body).map_err(|e| SendError::transport(e.to_string()))?
        } else {
            body
        };

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| SendError::retryable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(SendError::fatal());
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(SendError::retryable(format!("status {status}")));
        }
        let text = response.text().await.unwrap_or_default();
        Err(SendError::non_retryable(status.as_u16(), text))
    }

    /// `Test(service, env)`: one log + one span + one metric event with
    /// distinctive tags, sent through the normal send path.
    pub async fn test(
        &self,
        service_name: &str,
        environment: &str,
    ) -> Result<SendOutcome, ForwarderError> {
        let mut log = Event::new_log(service_name, environment, Level::Info, "sidecar test event");
        let mut span = Event::new_span(service_name, environment, "GET /healthz", Some(200));
        let mut metric = Event {
            header: crate::event::EventHeader::new(service_name, environment),
            body: EventBody::Metric {
                metric_name: "sidecar.test".to_string(),
                metric_value: 1.0,
            },
        };
        for event in [&mut log, &mut span, &mut metric] {
            event.header.tags.insert("yaat.sidecar".to_string(), "true".to_string());
            event.header.tags.insert("yaat.test".to_string(), "true".to_string());
        }
        self.send(vec![log, span, metric]).await
    }
}

struct SendError {
    retryable: bool,
    fatal: bool,
    status: Option<u16>,
    message: String,
}

impl SendError {
    fn fatal() -> Self {
        Self {
            retryable: false,
            fatal: true,
            status: Some(401),
            message: "authentication failed".to_string(),
        }
    }

    fn retryable(message: String) -> Self {
        Self {
            retryable: true,
            fatal: false,
            status: None,
            message,
        }
    }

    fn non_retryable(status: u16, body: String) -> Self {
        Self {
            retryable: false,
            fatal: false,
            status: Some(status),
            message: body,
        }
    }

    fn transport(message: String) -> Self {
        Self {
            retryable: true,
            fatal: false,
            status: None,
            message,
        }
    }

    fn is_fatal(&self) -> bool {
        self.fatal
    }

    fn into_forwarder_error(self) -> ForwarderError {
        if self.fatal {
            return ForwarderError::AuthFailed;
        }
        match self.status {
            Some(status) => ForwarderError::NonRetryable {
                status,
                body: self.message,
            },
            None => ForwarderError::Retryable {
                attempts: MAX_ATTEMPTS,
                message: self.message,
            },
        }
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Split `events` into batches of at most `batch_size` whose JSON-encoded
/// size is at most `max_batch_bytes` (`0` disables the bound), shrinking a
/// batch until it fits. A lone oversized event is sent anyway with a
/// warning logged.
fn partition_batches(events: Vec<Event>, batch_size: usize, max_batch_bytes: usize) -> Vec<Vec<Event>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut remaining = events;

    while !remaining.is_empty() {
        let take = remaining.len().min(batch_size);
        let mut candidate: Vec<Event> = remaining.drain(..take).collect();

        if max_batch_bytes > 0 {
            while candidate.len() > 1 && encoded_len(&candidate) > max_batch_bytes {
                let overflow = candidate.split_off(candidate.len() / 2);
                remaining.splice(0..0, overflow);
            }
            if candidate.len() == 1 && encoded_len(&candidate) > max_batch_bytes {
                warn!(
                    bytes = encoded_len(&candidate),
                    max_batch_bytes, "single event exceeds max_batch_bytes, sending anyway"
                );
            }
        }

        batches.push(candidate);
    }
    batches
}

fn encoded_len(events: &[Event]) -> usize {
    serde_json::to_vec(&Envelope { events }).map(|b| b.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;

    fn event() -> Event {
        Event::new_log("svc", "prod", Level::Info, "x")
    }

    #[test]
    fn partitions_respect_batch_size() {
        let events: Vec<Event> = (0..1250).map(|_| event()).collect();
        let batches = partition_batches(events, 500, 0);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 500);
        assert_eq!(batches[2].len(), 250);
    }

    #[test]
    fn partitions_shrink_to_respect_byte_bound() {
        let events: Vec<Event> = (0..20)
            .map(|_| Event::new_log("svc", "prod", Level::Info, "x".repeat(500)))
            .collect();
        let single_event_bytes = encoded_len(&[event()]);
        let bound = single_event_bytes * 3;
        let batches = partition_batches(events, 500, bound);
        for batch in &batches {
            assert!(batch.len() == 1 || encoded_len(batch) <= bound);
        }
    }

    #[test]
    fn oversized_single_event_is_kept_not_dropped() {
        let events = vec![Event::new_log("svc", "prod", Level::Info, "x".repeat(10_000))];
        let batches = partition_batches(events, 500, 10);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn normalize_rejects_before_any_batch_is_sent() {
        let invalid = vec![Event::new_log("", "prod", Level::Info, "x")];
        let mut events = invalid;
        let err = events[0].normalize().unwrap_err();
        assert!(matches!(err, ForwarderError::InvalidEvent(_)));
    }

    /// `Send([{message:"x"}])` (here: an event missing `service_name`)
    /// returns an error before any HTTP request is made -- the endpoint
    /// points at a port nothing listens on, so a network
    /// attempt would surface as a transport error, not `InvalidEvent`.
    #[tokio::test]
    async fn send_rejects_invalid_event_without_making_a_request() {
        let forwarder = Forwarder::new(ForwarderConfig {
            endpoint: "http://127.0.0.1:9/unreachable".to_string(),
            api_key: "key".to_string(),
            batch_size: 500,
            compress: false,
            max_batch_bytes: 0,
        })
        .unwrap();
        let events = vec![Event::new_log("", "prod", Level::Info, "x")];
        let err = forwarder.send(events).await.unwrap_err();
        assert!(matches!(err, ForwarderError::InvalidEvent(_)));
    }
}
