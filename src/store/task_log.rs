// src/store/task_log.rs

//! Append-only JSONL log of task records, written off the async runtime.
//!
//! Every `save_task` appends the full record. On open the log is replayed
//! (last record per task wins) and rewritten compacted. A torn final line
//! from a crash is skipped.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::store::records::TaskRecord;

#[derive(Debug)]
pub(crate) struct TaskLog {
    path: PathBuf,
    tx: Option<mpsc::Sender<TaskRecord>>,
    writer: Option<JoinHandle<()>>,
}

impl TaskLog {
    /// Read back every task in first-seen order.
    pub(crate) fn replay(path: &Path) -> anyhow::Result<Vec<TaskRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(path).with_context(|| format!("reading task log {:?}", path))?;

        let mut tasks: Vec<TaskRecord> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();
        for (n, line) in raw.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let task: TaskRecord = match serde_json::from_slice(line) {
                Ok(task) => task,
                Err(err) => {
                    warn!(path = %path.display(), line = n + 1, error = %err, "skipping unreadable task record");
                    continue;
                }
            };
            match index.get(&task.id) {
                Some(&slot) => tasks[slot] = task,
                None => {
                    index.insert(task.id, tasks.len());
                    tasks.push(task);
                }
            }
        }
        Ok(tasks)
    }

    /// Rewrite the log to hold exactly `tasks`, then start the writer thread.
    pub(crate) fn open(path: PathBuf, tasks: &[TaskRecord]) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }

        let tmp = path.with_extension("jsonl.tmp");
        {
            let file = File::create(&tmp).with_context(|| format!("creating file {:?}", tmp))?;
            let mut out = BufWriter::new(file);
            write_batch(&mut out, tasks).with_context(|| format!("writing to file {:?}", tmp))?;
        }
        fs::rename(&tmp, &path).with_context(|| format!("renaming {:?} to {:?}", tmp, path))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("opening task log {:?}", path))?;
        let (tx, rx) = mpsc::channel();
        let log_path = path.clone();
        let writer = thread::Builder::new()
            .name("ingestflow-task-log".to_string())
            .spawn(move || write_loop(file, rx, &log_path))
            .context("spawning task log writer")?;

        debug!(path = %path.display(), tasks = tasks.len(), "task log compacted");
        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Queue `task` for the writer. Never blocks on IO.
    pub(crate) fn append(&self, task: TaskRecord) {
        let sent = self.tx.as_ref().is_some_and(|tx| tx.send(task).is_ok());
        if !sent {
            error!(path = %self.path.display(), "task log writer is gone; task record not persisted");
        }
    }
}

impl Drop for TaskLog {
    /// Flushes everything queued so far.
    fn drop(&mut self) {
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!(path = %self.path.display(), "task log writer panicked");
            }
        }
    }
}

/// Drains whatever is queued into one write and one sync.
fn write_loop(file: File, rx: mpsc::Receiver<TaskRecord>, path: &Path) {
    let mut out = BufWriter::new(file);
    while let Ok(first) = rx.recv() {
        let mut batch = vec![first];
        batch.extend(rx.try_iter());
        if let Err(err) = write_batch(&mut out, &batch) {
            error!(path = %path.display(), records = batch.len(), error = %format!("{err:#}"), "could not append task records");
        }
    }
}

fn write_batch(out: &mut BufWriter<File>, tasks: &[TaskRecord]) -> anyhow::Result<()> {
    for task in tasks {
        serde_json::to_writer(&mut *out, task).context("serializing task record")?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    out.get_ref().sync_data()?;
    Ok(())
}
