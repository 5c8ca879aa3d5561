use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use pubsub_api::{LogError, Message, MessageLog, Replay};

use crate::config::{JsonlLogConfig, LOG_FILE};

// ════════════════════════════════════════════════════════════════
//  JsonlLog
// ════════════════════════════════════════════════════════════════

struct Writer {
    file: File,
    next_id: u64,
    /// Length of the file covered by complete, acknowledged lines.
    committed: u64,
}

/// Append-only message log on disk.
///
/// Layout:
/// ```text
/// {data_dir}/messages.jsonl
/// ```
/// One JSON `Message` per line, ascending by id. Appends are serialized
/// by a mutex; replay reads only up to the length committed when it
/// started, so it never sees a half-written line or a later append.
pub struct JsonlLog {
    data_dir: PathBuf,
    path: PathBuf,
    sync_writes: bool,
    writer: Mutex<Option<Writer>>,
}

impl JsonlLog {
    pub fn new(config: &JsonlLogConfig) -> Self {
        let data_dir = PathBuf::from(&config.data_dir);
        Self {
            path: data_dir.join(LOG_FILE),
            data_dir,
            sync_writes: config.sync_writes,
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<Writer>> {
        match self.writer.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(path = %self.path.display(), "log writer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    // ── Init / recovery ──

    fn do_init(&self) -> Result<(), LogError> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| LogError::io(format!("mkdir {}: {e}", self.data_dir.display())))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| LogError::io(format!("open {}: {e}", self.path.display())))?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| LogError::from(e).with_context("read log"))?;

        let complete = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
        if complete < bytes.len() {
            tracing::warn!(
                path = %self.path.display(),
                torn_bytes = bytes.len() - complete,
                "truncating torn tail"
            );
            file.set_len(complete as u64)
                .map_err(|e| LogError::from(e).with_context("truncate torn tail"))?;
        }

        let mut max_id = 0;
        for (idx, line) in bytes[..complete].split(|&b| b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Message>(line) {
                Ok(m) => max_id = max_id.max(m.id),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = idx + 1, error = %e, "undecodable record");
                }
            }
        }

        *self.lock() = Some(Writer {
            file,
            next_id: max_id + 1,
            committed: complete as u64,
        });
        tracing::info!(path = %self.path.display(), next_id = max_id + 1, "message log opened");
        Ok(())
    }

    // ── Append ──

    fn do_append(&self, topic: String, content: String) -> Result<Message, LogError> {
        let mut guard = self.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| LogError::not_ready("message log not initialized"))?;

        let message = Message { id: writer.next_id, topic, content };
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        if let Err(e) = write_at(&mut writer.file, writer.committed, &line, self.sync_writes) {
            // Cut off whatever part of the line made it to disk.
            if let Err(trunc) = writer.file.set_len(writer.committed) {
                tracing::error!(path = %self.path.display(), error = %trunc, "rollback of partial append failed");
            }
            return Err(e.with_context("append"));
        }

        writer.committed += line.len() as u64;
        writer.next_id += 1;
        Ok(message)
    }

    // ── Replay ──

    fn do_replay(&self, topic: &str) -> Result<Replay, LogError> {
        let committed = match self.lock().as_ref() {
            Some(w) => w.committed,
            None => return Err(LogError::not_ready("message log not initialized")),
        };

        let file = File::open(&self.path)
            .map_err(|e| LogError::io(format!("open {}: {e}", self.path.display())))?;
        let reader = BufReader::new(file.take(committed));

        let mut replay = Replay::default();
        for (idx, line) in reader.split(b'\n').enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = idx + 1, error = %e, "replay read failed, returning partial history");
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Message>(&line) {
                Ok(m) if m.topic == topic => replay.messages.push(m),
                Ok(_) => {}
                Err(e) => {
                    replay.skipped += 1;
                    tracing::warn!(path = %self.path.display(), line = idx + 1, error = %e, "skipping undecodable record");
                }
            }
        }
        Ok(replay)
    }

    fn do_flush(&self) -> Result<(), LogError> {
        if let Some(writer) = self.lock().as_mut() {
            writer.file.sync_all()
                .map_err(|e| LogError::from(e).with_context("fsync"))?;
        }
        Ok(())
    }
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8], sync: bool) -> Result<(), LogError> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

impl MessageLog for JsonlLog {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        Box::pin(async move { self.do_init() })
    }

    fn append(
        &self,
        topic: &str,
        content: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Message, LogError>> + Send + '_>> {
        let topic = topic.to_string();
        let content = content.to_string();
        Box::pin(async move { self.do_append(topic, content) })
    }

    fn replay(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Replay, LogError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move { self.do_replay(&topic) })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        Box::pin(async move { self.do_flush() })
    }
}
