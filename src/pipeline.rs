//! Shared pipeline context.
//!
//! The source system reaches its scrubber/diagnostics state through process
//! singletons; this crate passes an explicit context down to every producer
//! and the flusher instead, so tests can instantiate a fresh one per case
//! rather than sharing global state across the whole test binary.

use std::sync::Arc;

use crate::analytics::AnalyticsWriter;
use crate::buffer::Buffer;
use crate::diagnostics::Diagnostics;
use crate::diskqueue::DiskQueue;
use crate::forwarder::Forwarder;
use crate::scrubber::Scrubber;

#[derive(Clone)]
pub struct Pipeline {
    pub buffer: Arc<Buffer>,
    pub scrubber: Arc<Scrubber>,
    pub diagnostics: Arc<Diagnostics>,
    pub disk_queue: Arc<DiskQueue>,
    pub forwarder: Option<Arc<Forwarder>>,
    pub analytics: Option<Arc<AnalyticsWriter>>,
}
