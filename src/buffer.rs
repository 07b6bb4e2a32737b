//! Bounded in-memory event queue.
//!
//! One mutex, no reader/writer distinction, and a soft bound (never blocks,
//! never rejects) rather than a lock-free ring buffer -- that pattern was
//! considered and rejected as over-engineering for a single-mutex
//! soft-bounded queue this small.

use std::sync::Mutex;

use crate::event::Event;

/// A bounded, soft-limit, append-only queue of events.
pub struct Buffer {
    capacity: usize,
    events: Mutex<Vec<Event>>,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Append `event`. Returns `true` iff the buffer's length, after this
    /// add, first reached `capacity` (a hint to flush immediately).
    /// Never blocks; never rejects (a brief over-capacity window is allowed).
    pub fn add(&self, event: Event) -> bool {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        events.len() >= self.capacity
    }

    /// Drain and return all held events, resetting the buffer to empty.
    /// Returns an empty `Vec` (not an error) when nothing was held.
    pub fn flush(&self) -> Vec<Event> {
        let mut events = self.events.lock().unwrap();
        std::mem::take(&mut *events)
    }

    /// Attach a stacktrace to the most recently added error/critical log
    /// event, if one is still held (feeds the django traceback capture).
    /// A no-op if the buffer was already flushed or the last event isn't an
    /// error/critical log.
    pub fn set_stacktrace_on_last(&self, trace: String) {
        let mut events = self.events.lock().unwrap();
        if let Some(last) = events.iter_mut().rev().find(|e| e.is_error_or_critical()) {
            last.attach_stacktrace(trace);
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;

    fn ev() -> Event {
        Event::new_log("svc", "prod", Level::Info, "x")
    }

    #[test]
    fn add_returns_false_below_capacity() {
        let buf = Buffer::new(3);
        assert!(!buf.add(ev()));
        assert!(!buf.add(ev()));
    }

    #[test]
    fn add_returns_true_exactly_once_capacity_first_reached() {
        let buf = Buffer::new(2);
        assert!(!buf.add(ev()));
        assert!(buf.add(ev()));
        // "returns true iff resulting length >= N" stays true for every
        // subsequent add past capacity too, since over-capacity is allowed.
        assert!(buf.add(ev()));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn flush_drains_and_resets() {
        let buf = Buffer::new(10);
        buf.add(ev());
        buf.add(ev());
        let drained = buf.flush();
        assert_eq!(drained.len(), 2);
        assert!(buf.is_empty());
        assert!(buf.flush().is_empty());
    }

    #[test]
    fn stacktrace_attaches_to_most_recent_error_event() {
        use crate::event::EventBody;

        let buf = Buffer::new(10);
        buf.add(Event::new_log("svc", "prod", Level::Error, "first failure"));
        buf.add(ev());
        buf.set_stacktrace_on_last("line1\nline2".to_string());
        let drained = buf.flush();
        if let EventBody::Log { stacktrace, .. } = &drained[0].body {
            assert_eq!(stacktrace.as_deref(), Some("line1\nline2"));
        } else {
            panic!("expected log body");
        }
        if let EventBody::Log { stacktrace, .. } = &drained[1].body {
            assert!(stacktrace.is_none());
        }
    }
}
