//! systemd journal tailer. Linux-only; constructing this on any
//! other platform (or with the `journald` feature disabled) returns
//! [`ProducerError::NotSupported`] and the caller skips the collector, the
//! same pattern [`super::metrics_sampler::MetricsSampler`] uses for
//! counters a platform doesn't expose.

use crate::error::ProducerError;
use crate::event::Level;

use super::GlobalTags;

pub struct JournaldTailerConfig {
    pub unit_filter: Option<String>,
    pub service_name: String,
    pub environment: String,
    pub global_tags: GlobalTags,
}

/// Map a syslog priority (0-7) to a [`Level`] 
fn priority_to_level(priority: u8) -> Level {
    match priority {
        0 | 1 => Level::Critical,
        2 | 3 => Level::Error,
        4 => Level::Warning,
        5 | 6 => Level::Info,
        _ => Level::Debug,
    }
}

#[cfg(all(target_os = "linux", feature = "journald"))]
mod linux {
    use std::sync::Arc;
    use std::time::Duration;

    use systemd::journal::{Journal, JournalRecord, OpenOptions};
    use tokio::sync::watch;
    use tracing::warn;

    use crate::buffer::Buffer;
    use crate::event::Event;
    use crate::scrubber::Scrubber;

    use super::{priority_to_level, JournaldTailerConfig, ProducerError};

    const POLL_INTERVAL: Duration = Duration::from_millis(200);

    pub struct JournaldTailer {
        config: JournaldTailerConfig,
        journal: Journal,
    }

    impl JournaldTailer {
        pub fn new(config: JournaldTailerConfig) -> Result<Self, ProducerError> {
            let mut journal = OpenOptions::default()
                .open()
                .map_err(|e| ProducerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            journal
                .seek_tail()
                .map_err(|e| ProducerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            Ok(Self { config, journal })
        }

        fn matches_unit(&self, record: &JournalRecord) -> bool {
            match &self.config.unit_filter {
                None => true,
                Some(unit) => record
                    .get("_SYSTEMD_UNIT")
                    .map(|u| u == unit)
                    .unwrap_or(false),
            }
        }

        fn build_event(&self, record: &JournalRecord) -> Event {
            let priority: u8 = record
                .get("PRIORITY")
                .and_then(|p| p.parse().ok())
                .unwrap_or(6);
            let level = priority_to_level(priority);
            let message = record.get("MESSAGE").cloned().unwrap_or_default();

            let mut event = Event::new_log(&self.config.service_name, &self.config.environment, level, message);

            let fields = [
                ("unit", record.get("_SYSTEMD_UNIT")),
                ("identifier", record.get("SYSLOG_IDENTIFIER")),
                ("hostname", record.get("_HOSTNAME")),
                ("transport", record.get("_TRANSPORT")),
                ("pid", record.get("_PID")),
                ("comm", record.get("_COMM")),
                ("executable", record.get("_EXE")),
                ("syslog_facility", record.get("SYSLOG_FACILITY")),
            ];
            for (tag, value) in fields {
                if let Some(v) = value {
                    if !v.is_empty() {
                        event.header.tags.insert(tag.to_string(), v.clone());
                    }
                }
            }
            self.config.global_tags.merge_into(&mut event.header.tags);
            event
        }

        pub async fn run(
            mut self,
            buffer: Arc<Buffer>,
            scrubber: Arc<Scrubber>,
            mut stop: watch::Receiver<bool>,
        ) {
            loop {
                match self.journal.next_entry() {
                    Ok(Some(record)) => {
                        if self.matches_unit(&record) {
                            let mut event = self.build_event(&record);
                            if scrubber.apply(&mut event) {
                                buffer.add(event);
                            }
                        }
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(error = %err, "journald read error");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = stop.changed() => return,
                }
                if *stop.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(all(target_os = "linux", feature = "journald"))]
pub use linux::JournaldTailer;

#[cfg(not(all(target_os = "linux", feature = "journald")))]
pub struct JournaldTailer;

#[cfg(not(all(target_os = "linux", feature = "journald")))]
impl JournaldTailer {
    pub fn new(_config: JournaldTailerConfig) -> Result<Self, ProducerError> {
        Err(ProducerError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_mapping_matches_syslog_severities() {
        assert_eq!(priority_to_level(0), Level::Critical);
        assert_eq!(priority_to_level(1), Level::Critical);
        assert_eq!(priority_to_level(2), Level::Error);
        assert_eq!(priority_to_level(3), Level::Error);
        assert_eq!(priority_to_level(4), Level::Warning);
        assert_eq!(priority_to_level(5), Level::Info);
        assert_eq!(priority_to_level(6), Level::Info);
        assert_eq!(priority_to_level(7), Level::Debug);
    }

    #[cfg(not(all(target_os = "linux", feature = "journald")))]
    #[test]
    fn construction_is_not_supported_off_linux_or_without_feature() {
        let config = JournaldTailerConfig {
            unit_filter: None,
            service_name: "svc".to_string(),
            environment: "prod".to_string(),
            global_tags: GlobalTags::default(),
        };
        assert!(matches!(
            JournaldTailer::new(config),
            Err(ProducerError::NotSupported)
        ));
    }
}
