//! Call-detail records
//!
//! Timeslots take a record from the [`CdrPool`] free list, fill it and
//! submit it without blocking. The poster task (see
//! [`crate::workers::CdrPoster`]) writes it to a [`CdrSink`] and hands it
//! back to the pool.

use crate::errors::{IvrError, Result};
use crate::event::SlotId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Which end of a call a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdrKind {
    #[default]
    Start,
    Stop,
}

/// One start or stop record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallDetailRecord {
    pub kind: CdrKind,
    pub slot: SlotId,
    pub sequence: u64,
    pub cid: String,
    pub started: DateTime<Utc>,
    /// Set on stop records
    pub duration_ms: Option<u64>,
    pub reason: String,
    pub source: String,
    pub target: String,
    pub script: String,
    pub payload: Option<String>,
}

impl CallDetailRecord {
    /// Reset for reuse, keeping string capacity
    fn clear(&mut self) {
        self.kind = CdrKind::Start;
        self.slot = 0;
        self.sequence = 0;
        self.cid.clear();
        self.started = DateTime::<Utc>::default();
        self.duration_ms = None;
        self.reason.clear();
        self.source.clear();
        self.target.clear();
        self.script.clear();
        self.payload = None;
    }
}

/// Receiving end of the pending-record queue
pub type CdrQueue = mpsc::UnboundedReceiver<Box<CallDetailRecord>>;

/// Free list of records plus the pending queue they are submitted to
#[derive(Debug)]
pub struct CdrPool {
    free: Mutex<Vec<Box<CallDetailRecord>>>,
    capacity: usize,
    pending: mpsc::UnboundedSender<Box<CallDetailRecord>>,
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl CdrPool {
    /// Pre-allocate `capacity` records
    pub fn new(capacity: usize) -> (Arc<Self>, CdrQueue) {
        let (pending, queue) = mpsc::unbounded_channel();
        let free = (0..capacity).map(|_| Box::default()).collect();
        let pool = Arc::new(Self {
            free: Mutex::new(free),
            capacity,
            pending,
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (pool, queue)
    }

    /// Take a blank record; allocates only when the free list is empty
    pub fn acquire(&self) -> Box<CallDetailRecord> {
        match self.free.lock().pop() {
            Some(record) => record,
            None => {
                debug!("Call detail pool exhausted, allocating");
                Box::default()
            }
        }
    }

    /// Queue a filled record for the poster
    pub fn submit(&self, record: Box<CallDetailRecord>) {
        match self.pending.send(record) {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::SendError(record)) => {
                warn!("Call detail poster stopped, dropping record for slot {}", record.slot);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.recycle(record);
            }
        }
    }

    /// Return a written record to the free list
    pub fn recycle(&self, mut record: Box<CallDetailRecord>) {
        record.clear();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(record);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Records lost because no poster was listening
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Storage for call-detail records
#[async_trait]
pub trait CdrSink: Send + Sync {
    async fn write(&self, record: &CallDetailRecord) -> Result<()>;

    /// Flush buffered output; called when the poster stops
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Logs each record at `info` under the `cdr` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl CdrSink for TracingSink {
    async fn write(&self, record: &CallDetailRecord) -> Result<()> {
        info!(
            target: "cdr",
            kind = ?record.kind,
            slot = record.slot,
            sequence = record.sequence,
            cid = %record.cid,
            duration_ms = ?record.duration_ms,
            reason = %record.reason,
            script = %record.script,
            "call detail"
        );
        Ok(())
    }
}

/// Appends one JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonLinesSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CdrSink for JsonLinesSink {
    async fn write(&self, record: &CallDetailRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(|e| IvrError::call_detail(e.to_string()))?;
        line.push('\n');

        let mut file = self.file.lock().await;
        if file.is_none() {
            let opened = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *file = Some(opened);
        }
        let written = match file.as_mut() {
            Some(handle) => handle.write_all(line.as_bytes()).await,
            None => Ok(()),
        };
        if let Err(e) = written {
            // reopen on the next record
            *file = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if let Some(handle) = self.file.lock().await.as_mut() {
            handle.flush().await?;
        }
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CallDetailRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallDetailRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl CdrSink for MemorySink {
    async fn write(&self, record: &CallDetailRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
