//! Event producers: everything that turns an external signal into
//! [`crate::event::Event`]s on a [`crate::buffer::Buffer`].
//!
//! Each producer is a free-standing `run` future spawned onto its own
//! `tokio::spawn`, the way a proxy server and demo loop get spawned
//! as independent tasks in `main.rs`. A panic or error inside one producer
//! never takes down another.

pub mod journald_tailer;
pub mod log_tailer;
pub mod metrics_sampler;
pub mod proxy_capturer;
pub mod statsd_server;
mod traceback;

use std::collections::HashMap;

/// Tag overlay applied to every event a producer emits, merged in after
/// parser/producer-specific tags (event tags win on conflict).
#[derive(Debug, Clone, Default)]
pub struct GlobalTags(pub HashMap<String, String>);

impl GlobalTags {
    pub fn merge_into(&self, tags: &mut HashMap<String, String>) {
        for (key, value) in &self.0 {
            tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}
