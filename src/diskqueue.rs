//! Durable on-disk spill queue.
//!
//! Each enqueued batch is one JSON file; dequeue leases it by renaming
//! `X.json -> X.json.processing`, ack deletes it, fail renames it back. The
//! filesystem rename is the serialization point for durability; the
//! in-process [`std::sync::Mutex`] only prevents two local tasks racing the
//! same rename, the way `oddjobs`' WAL directory is guarded by a single
//! writer lock around its own file-based state transitions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::error::DiskQueueError;
use crate::event::Event;

const DEADLETTER_DIR: &str = "deadletter";
const PROCESSING_EXT: &str = "processing";
const JSON_EXT: &str = "json";

/// Opaque handle identifying one leased batch; is the processing filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Stable identifier for this lease, usable as a map key by callers that
    /// need to track per-batch state (e.g. the flusher's retry counter).
    pub fn id(&self) -> &str {
        &self.0
    }

    fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.0)
    }

    /// The original `X.json` name this lease was taken from, recovered by
    /// stripping the appended `.processing` suffix (the processing filename
    /// is `X.json.processing`, not an extension swap).
    fn basename(&self) -> &str {
        self.0
            .strip_suffix(&format!(".{PROCESSING_EXT}"))
            .unwrap_or(&self.0)
    }
}

pub struct DiskQueue {
    dir: PathBuf,
    deadletter_dir: PathBuf,
    lock: Mutex<()>,
}

impl DiskQueue {
    /// Open (creating if needed) the queue directory and its `deadletter/`
    /// partition, and recover any `.processing` file left by a crash by
    /// renaming it back to `.json` so it's picked up again on the next drain.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DiskQueueError> {
        let dir = dir.into();
        let deadletter_dir = dir.join(DEADLETTER_DIR);
        fs::create_dir_all(&dir).map_err(|source| DiskQueueError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        fs::create_dir_all(&deadletter_dir).map_err(|source| DiskQueueError::Io {
            path: deadletter_dir.display().to_string(),
            source,
        })?;

        let queue = Self {
            dir,
            deadletter_dir,
            lock: Mutex::new(()),
        };
        queue.recover()?;
        Ok(queue)
    }

    fn recover(&self) -> Result<(), DiskQueueError> {
        for entry in self.list_entries(&self.dir, PROCESSING_EXT)? {
            let file_name = entry.file_name().map(|n| n.to_string_lossy().into_owned());
            let Some(original) = file_name.as_deref().and_then(|n| {
                n.strip_suffix(&format!(".{PROCESSING_EXT}"))
            }) else {
                continue;
            };
            let recovered = entry.with_file_name(original);
            fs::rename(&entry, &recovered).map_err(|source| DiskQueueError::Io {
                path: entry.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn list_entries(&self, dir: &Path, ext: &str) -> Result<Vec<PathBuf>, DiskQueueError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| DiskQueueError::Io {
                path: dir.display().to_string(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(ext))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Write one batch of events as a new `.json` file.
    pub fn enqueue(&self, events: &[Event]) -> Result<(), DiskQueueError> {
        let _guard = self.lock.lock().unwrap();
        let name = format!("{}-{}.{JSON_EXT}", unix_nanos(), rand_suffix());
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec(events)?;
        fs::write(&path, bytes).map_err(|source| DiskQueueError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Lease the oldest pending batch, renaming it to `.processing` and
    /// returning its token plus decoded events. `None` when the queue is
    /// empty.
    pub fn dequeue(&self) -> Result<Option<(Token, Vec<Event>)>, DiskQueueError> {
        let _guard = self.lock.lock().unwrap();
        let pending = self.list_entries(&self.dir, JSON_EXT)?;
        let Some(path) = pending.into_iter().next() else {
            return Ok(None);
        };

        let processing_name = format!(
            "{}.{PROCESSING_EXT}",
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        );
        let processing_path = path.with_file_name(&processing_name);
        fs::rename(&path, &processing_path).map_err(|source| DiskQueueError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let bytes = fs::read(&processing_path).map_err(|source| DiskQueueError::Io {
            path: processing_path.display().to_string(),
            source,
        })?;
        let events: Vec<Event> = serde_json::from_slice(&bytes)?;
        let token = Token(
            processing_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        Ok(Some((token, events)))
    }

    pub fn ack(&self, token: &Token) -> Result<(), DiskQueueError> {
        let _guard = self.lock.lock().unwrap();
        let path = token.path_in(&self.dir);
        fs::remove_file(&path).map_err(|source| DiskQueueError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn fail(&self, token: &Token) -> Result<(), DiskQueueError> {
        let _guard = self.lock.lock().unwrap();
        let processing_path = token.path_in(&self.dir);
        let json_path = self.dir.join(token.basename());
        fs::rename(&processing_path, &json_path).map_err(|source| DiskQueueError::Io {
            path: processing_path.display().to_string(),
            source,
        })
    }

    pub fn move_to_dlq(&self, token: &Token) -> Result<(), DiskQueueError> {
        let _guard = self.lock.lock().unwrap();
        let processing_path = token.path_in(&self.dir);
        let dlq_path = self.deadletter_dir.join(token.basename());
        fs::rename(&processing_path, &dlq_path).map_err(|source| DiskQueueError::Io {
            path: processing_path.display().to_string(),
            source,
        })
    }

    pub fn pending(&self) -> Result<usize, DiskQueueError> {
        Ok(self.list_entries(&self.dir, JSON_EXT)?.len())
    }

    pub fn deadletter_pending(&self) -> Result<usize, DiskQueueError> {
        Ok(self.list_entries(&self.deadletter_dir, JSON_EXT)?.len())
    }

    /// Delete pending/deadletter files older than their respective
    /// retention, by mtime.
    pub fn cleanup(
        &self,
        queue_retention: Duration,
        dlq_retention: Duration,
    ) -> Result<(), DiskQueueError> {
        self.cleanup_dir(&self.dir, JSON_EXT, queue_retention)?;
        self.cleanup_dir(&self.deadletter_dir, JSON_EXT, dlq_retention)
    }

    fn cleanup_dir(&self, dir: &Path, ext: &str, retention: Duration) -> Result<(), DiskQueueError> {
        let now = SystemTime::now();
        for path in self.list_entries(dir, ext)? {
            let metadata = fs::metadata(&path).map_err(|source| DiskQueueError::Io {
                path: path.display().to_string(),
                source,
            })?;
            if let Ok(modified) = metadata.modified() {
                if let Ok(age) = now.duration_since(modified) {
                    if age > retention {
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
        Ok(())
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn rand_suffix() -> u32 {
    rand::thread_rng().gen::<u32>()
}
