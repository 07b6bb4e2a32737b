//! Tails a log file, feeding parsed events into a [`Buffer`].
//!
//! Rotation handling is poll-based rather than event-driven: no crate in
//! this codebase's dependency stack gives us inotify, so every EOF compares
//! the file's inode against the one we opened and reopens from byte zero
//! when it moved out from under us. Simpler than a watcher thread and good
//! enough at the polling interval this agent already runs its other
//! producers at.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::watch;
use tracing::warn;

use crate::buffer::Buffer;
use crate::error::ProducerError;
use crate::parsers::{self, Format, ParserContext};
use crate::scrubber::Scrubber;

use super::traceback::{Feed, TracebackCapture};
use super::GlobalTags;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct LogTailerConfig {
    pub path: PathBuf,
    pub format: Format,
    pub service_name: String,
    pub environment: String,
    pub global_tags: GlobalTags,
}

pub struct LogTailer {
    config: LogTailerConfig,
    buffer: Arc<Buffer>,
    scrubber: Arc<Scrubber>,
}

impl LogTailer {
    pub fn new(config: LogTailerConfig, buffer: Arc<Buffer>, scrubber: Arc<Scrubber>) -> Self {
        Self {
            config,
            buffer,
            scrubber,
        }
    }

    /// Tail the file until `stop` fires. Never propagates an error: tail
    /// failures are logged and this task exits quietly rather than taking
    /// down other producers.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }
            match self.open_at_end().await {
                Ok((file, id)) => {
                    if let Err(err) = self.follow(file, id, &mut stop).await {
                        warn!(
                            path = %self.config.path.display(),
                            error = %err,
                            "log tailer error, reopening"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        path = %self.config.path.display(),
                        error = %err,
                        "failed to open log file, retrying"
                    );
                }
            }
            if *stop.borrow() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = stop.changed() => return,
            }
        }
    }

    async fn open_at_end(&self) -> Result<(File, FileId), ProducerError> {
        let mut file = File::open(&self.config.path).await?;
        file.seek(SeekFrom::End(0)).await?;
        let id = file_id(&self.config.path)?;
        Ok((file, id))
    }

    async fn follow(
        &mut self,
        file: File,
        mut id: FileId,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), ProducerError> {
        let mut reader = BufReader::new(file);
        let mut traceback = TracebackCapture::new();
        let ctx = ParserContext {
            service_name: self.config.service_name.clone(),
            environment: self.config.environment.clone(),
        };

        loop {
            let mut raw = String::new();
            tokio::select! {
                result = reader.read_line(&mut raw) => {
                    let n = result?;
                    if n == 0 {
                        match file_id(&self.config.path) {
                            Ok(current) if current != id => return Ok(()),
                            Ok(current) => id = current,
                            Err(_) => return Ok(()),
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                            _ = stop.changed() => return Ok(()),
                        }
                    }
                    let line = raw.trim_end_matches(['\n', '\r']).to_string();
                    self.handle_line(&line, &ctx, &mut traceback);
                }
                _ = stop.changed() => return Ok(()),
            }
        }
    }

    fn handle_line(&self, line: &str, ctx: &ParserContext, traceback: &mut TracebackCapture) {
        if self.config.format == Format::Django {
            match traceback.feed(line) {
                Feed::Consumed => return,
                Feed::Completed(trace) => {
                    self.buffer.set_stacktrace_on_last(trace);
                    return;
                }
                Feed::NotCaptured => {}
            }
        }

        let Some(mut event) = parsers::parse_line(self.config.format, line, ctx) else {
            return;
        };
        if !self.scrubber.apply(&mut event) {
            return;
        }
        self.config.global_tags.merge_into(&mut event.header.tags);
        self.buffer.add(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId(#[cfg(unix)] u64, #[cfg(not(unix))] ());

#[cfg(unix)]
fn file_id(path: &Path) -> std::io::Result<FileId> {
    use std::os::unix::fs::MetadataExt;
    Ok(FileId(std::fs::metadata(path)?.ino()))
}

#[cfg(not(unix))]
fn file_id(path: &Path) -> std::io::Result<FileId> {
    std::fs::metadata(path)?;
    Ok(FileId(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;

    fn ctx() -> ParserContext {
        ParserContext {
            service_name: "svc".to_string(),
            environment: "test".to_string(),
        }
    }

    fn tailer(format: Format) -> LogTailer {
        LogTailer::new(
            LogTailerConfig {
                path: PathBuf::from("/dev/null"),
                format,
                service_name: "svc".to_string(),
                environment: "test".to_string(),
                global_tags: GlobalTags::default(),
            },
            Arc::new(Buffer::new(100)),
            Arc::new(Scrubber::empty()),
        )
    }

    #[test]
    fn traceback_lines_are_withheld_from_parsing() {
        let tailer = tailer(Format::Django);
        let mut fsm = TracebackCapture::new();
        let c = ctx();
        tailer.handle_line(
            "[2024-10-26 10:30:15,123] ERROR [django.request] boom",
            &c,
            &mut fsm,
        );
        tailer.handle_line("Traceback (most recent call last):", &c, &mut fsm);
        tailer.handle_line("  File \"app.py\", line 1, in f", &c, &mut fsm);
        tailer.handle_line("ValueError: bad input", &c, &mut fsm);

        let drained = tailer.buffer.flush();
        assert_eq!(drained.len(), 1);
        if let EventBody::Log { stacktrace, .. } = &drained[0].body {
            assert!(stacktrace.as_ref().unwrap().contains("ValueError: bad input"));
        } else {
            panic!("expected log body");
        }
    }

    #[test]
    fn global_tags_fill_gaps_without_overriding_event_tags() {
        let mut tags = std::collections::HashMap::new();
        tags.insert("region".to_string(), "us-east".to_string());
        tags.insert("logger".to_string(), "overridden-should-not-apply".to_string());
        let tailer = LogTailer::new(
            LogTailerConfig {
                path: PathBuf::from("/dev/null"),
                format: Format::Django,
                service_name: "svc".to_string(),
                environment: "test".to_string(),
                global_tags: GlobalTags(tags),
            },
            Arc::new(Buffer::new(100)),
            Arc::new(Scrubber::empty()),
        );
        let mut fsm = TracebackCapture::new();
        tailer.handle_line(
            "[2024-10-26 10:30:15,123] INFO [django.request] hi",
            &ctx(),
            &mut fsm,
        );
        let drained = tailer.buffer.flush();
        assert_eq!(drained[0].header.tags.get("region").unwrap(), "us-east");
        assert_eq!(drained[0].header.tags.get("logger").unwrap(), "django.request");
    }
}
