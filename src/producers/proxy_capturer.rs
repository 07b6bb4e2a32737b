//! HTTP reverse proxy that emits a `span` event per request.
//!
//! Grounded in a reverse-proxy handler: same axum catch-all route +
//! reqwest forwarding client shape, stripped of response inspection/parsing
//! (no augmentation, translation, or tool-call parsing here -- this proxy
//! exists only to time and tag requests, not to understand their payload).

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::buffer::Buffer;
use crate::event::Event;
use crate::scrubber::Scrubber;

use super::GlobalTags;

pub struct ProxyCapturerConfig {
    pub bind_addr: String,
    pub upstream_url: String,
    pub service_name: String,
    pub environment: String,
    pub global_tags: GlobalTags,
}

#[derive(Clone)]
struct ProxyState {
    client: reqwest::Client,
    config: Arc<ProxyCapturerConfig>,
    buffer: Arc<Buffer>,
    scrubber: Arc<Scrubber>,
}

pub enum ProxyCapturerError {
    Build(String),
    Bind(String),
    Serve(String),
}

impl std::fmt::Display for ProxyCapturerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyCapturerError::Build(e) => write!(f, "failed to build proxy client: {e}"),
            ProxyCapturerError::Bind(e) => write!(f, "failed to bind proxy listener: {e}"),
            ProxyCapturerError::Serve(e) => write!(f, "proxy server error: {e}"),
        }
    }
}

pub async fn run(
    config: ProxyCapturerConfig,
    buffer: Arc<Buffer>,
    scrubber: Arc<Scrubber>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) -> Result<(), ProxyCapturerError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .pool_max_idle_per_host(10)
        .http1_only()
        .build()
        .map_err(|e| ProxyCapturerError::Build(e.to_string()))?;

    let bind_addr = config.bind_addr.clone();
    let state = ProxyState {
        client,
        config: Arc::new(config),
        buffer,
        scrubber,
    };

    let app = Router::new().route("/*path", any(proxy_handler)).with_state(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| ProxyCapturerError::Bind(e.to_string()))?;

    tracing::info!(addr = %bind_addr, "proxy capturer listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await
        .map_err(|e| ProxyCapturerError::Serve(e.to_string()))?;

    Ok(())
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>, StatusCode> {
    let start = Instant::now();
    let trace_id = Uuid::new_v4().to_string();
    let span_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let forward_url = {
        let mut url = format!("{}{}", state.config.upstream_url, uri.path());
        if let Some(query) = uri.query() {
            url.push('?');
            url.push_str(query);
        }
        url
    };

    let forward_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut forward_req = state
        .client
        .request(forward_method, &forward_url)
        .body(body_bytes.to_vec())
        .header("X-Trace-Id", &trace_id)
        .header("X-Span-Id", &span_id);

    for (key, value) in headers.iter() {
        if key == "host" || key == "connection" || key == "transfer-encoding" {
            continue;
        }
        forward_req = forward_req.header(key.as_str(), value.as_bytes().to_vec());
    }

    let response = forward_req.send().await.map_err(|err| {
        tracing::warn!(error = %err, "proxy upstream request failed");
        StatusCode::BAD_GATEWAY
    })?;

    let status = status_as_u16(response.status());
    let response_headers = response.headers().clone();
    let response_body = response
        .bytes()
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;

    emit_span_event(&state, &method.to_string(), uri.path(), &host, status, start.elapsed());

    let mut builder = Response::builder().status(status);
    for (key, value) in response_headers.iter() {
        if key == "transfer-encoding" || key == "connection" {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_bytes().to_vec());
    }

    builder
        .body(Body::from(response_body))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
        .map(IntoResponse::into_response)
}

fn status_as_u16(status: reqwest::StatusCode) -> u16 {
    status.as_u16()
}

fn emit_span_event(
    state: &ProxyState,
    method: &str,
    path: &str,
    host: &str,
    status: u16,
    duration: std::time::Duration,
) {
    let mut event = Event::new_span(
        &state.config.service_name,
        &state.config.environment,
        format!("{method} {path}"),
        Some(status),
    );
    if let crate::event::EventBody::Span { duration_ms, .. } = &mut event.body {
        *duration_ms = duration.as_secs_f64() * 1000.0;
    }
    event.header.tags.insert("method".to_string(), method.to_string());
    event.header.tags.insert("path".to_string(), path.to_string());
    event.header.tags.insert("host".to_string(), host.to_string());
    state.config.global_tags.merge_into(&mut event.header.tags);

    if state.scrubber.apply(&mut event) {
        state.buffer.add(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;
    use crate::scrubber::Scrubber;

    #[test]
    fn span_event_carries_method_path_host_and_status() {
        let buffer = Arc::new(Buffer::new(10));
        let state = ProxyState {
            client: reqwest::Client::new(),
            config: Arc::new(ProxyCapturerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                upstream_url: "http://example.invalid".to_string(),
                service_name: "svc".to_string(),
                environment: "prod".to_string(),
                global_tags: GlobalTags::default(),
            }),
            buffer: buffer.clone(),
            scrubber: Arc::new(Scrubber::empty()),
        };
        emit_span_event(
            &state,
            "GET",
            "/api/users",
            "example.test",
            200,
            std::time::Duration::from_millis(42),
        );
        let events = buffer.flush();
        assert_eq!(events.len(), 1);
        if let EventBody::Span {
            operation,
            status_code,
            duration_ms,
            ..
        } = &events[0].body
        {
            assert_eq!(operation, "GET /api/users");
            assert_eq!(*status_code, Some(200));
            assert!(*duration_ms >= 42.0);
        } else {
            panic!("expected span body");
        }
        assert_eq!(events[0].header.tags.get("host").unwrap(), "example.test");
    }
}
