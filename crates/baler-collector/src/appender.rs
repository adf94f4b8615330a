//! Durable per-topic append logs.
//!
//! Reconstructed records land in `out_dir/<topic>.jsonl`, one canonical
//! record per line. Each topic's file is guarded by its own lock so
//! concurrent connections serialize writes to the same topic without
//! contending across topics. Writes are flushed to the OS per batch; an
//! fsync cadence is a policy decision left to operators.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Appends reconstructed batches to per-topic `.jsonl` files.
#[derive(Debug)]
pub struct LogAppender {
    out_dir: PathBuf,
    files: RwLock<HashMap<String, Arc<Mutex<BufWriter<File>>>>>,
}

impl LogAppender {
    /// Opens the appender, creating `out_dir` if needed.
    pub fn open(out_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            files: RwLock::new(HashMap::new()),
        })
    }

    pub fn out_dir(&self) -> &PathBuf {
        &self.out_dir
    }

    /// Appends a batch of records to `topic`'s log, one per line, and
    /// flushes to the OS.
    pub fn append_batch(&self, topic: &str, records: &[&[u8]]) -> std::io::Result<()> {
        let handle = self.handle(topic)?;
        let mut writer = handle.lock().expect("appender lock poisoned");
        for record in records {
            writer.write_all(record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    fn handle(&self, topic: &str) -> std::io::Result<Arc<Mutex<BufWriter<File>>>> {
        if let Some(found) = self.files.read().expect("appender lock poisoned").get(topic) {
            return Ok(Arc::clone(found));
        }
        let mut files = self.files.write().expect("appender lock poisoned");
        if let Some(found) = files.get(topic) {
            return Ok(Arc::clone(found));
        }
        let path = self.out_dir.join(format!("{topic}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let handle = Arc::new(Mutex::new(BufWriter::new(file)));
        files.insert(topic.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }
}
