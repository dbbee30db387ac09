//! Round Audit Log
//!
//! One record per crashed round with everything needed to recompute the
//! crash point. Records are append-only; the JSON-lines file store is the
//! durable default, the memory store backs tests.
//!
//! Stores are synchronous. The round owner reaches them through an
//! `AuditWriter`, which appends on the blocking pool in crash order.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use crate::core::clock::Millis;
use crate::core::units::CrashPoint;
use crate::fairness::seed::SeedCommitment;
use crate::game::round::RoundId;

/// Persisted fairness data for one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundAuditRecord {
    /// Round id.
    pub round_id: RoundId,
    /// Revealed server seed (hex).
    pub server_seed: String,
    /// Commitment published at round start.
    pub seed_hash: SeedCommitment,
    /// Client seed.
    pub client_seed: String,
    /// Nonce.
    pub nonce: u64,
    /// Crash point used for settlement.
    pub crash_point: CrashPoint,
    /// Start time (ms since epoch).
    pub start_time_ms: Millis,
    /// Crash time (ms since epoch).
    pub end_time_ms: Millis,
    /// Start time, human readable.
    pub started_at: DateTime<Utc>,
    /// Crash time, human readable.
    pub ended_at: DateTime<Utc>,
}

/// Convert clock milliseconds to a UTC timestamp.
pub fn utc_from_millis(ms: Millis) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_default()
}

/// Audit persistence errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Filesystem failure.
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("audit encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Store lock poisoned by a panicking writer.
    #[error("audit store poisoned")]
    Poisoned,
}

/// Append-only store of round records.
pub trait AuditStore: Send + Sync {
    /// Persist one record.
    fn append(&self, record: &RoundAuditRecord) -> Result<(), AuditError>;

    /// Most recent record, used to resume round ids and nonces.
    fn last(&self) -> Result<Option<RoundAuditRecord>, AuditError>;

    /// Look up a round.
    fn find(&self, round_id: RoundId) -> Result<Option<RoundAuditRecord>, AuditError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<RoundAuditRecord>>,
}

impl MemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot all records.
    pub fn records(&self) -> Vec<RoundAuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, record: &RoundAuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        records.push(record.clone());
        Ok(())
    }

    fn last(&self) -> Result<Option<RoundAuditRecord>, AuditError> {
        let records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        Ok(records.last().cloned())
    }

    fn find(&self, round_id: RoundId) -> Result<Option<RoundAuditRecord>, AuditError> {
        let records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        Ok(records.iter().find(|r| r.round_id == round_id).cloned())
    }
}

/// JSON-lines file, one record per line.
#[derive(Debug)]
pub struct JsonLinesAuditStore {
    path: PathBuf,
    file: Mutex<File>,
    /// Newest record, read once at open and kept current by `append`.
    last: Mutex<Option<RoundAuditRecord>>,
}

impl JsonLinesAuditStore {
    /// Open (or create) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let last = read_records(&path)?.pop();
        Ok(Self {
            path,
            file: Mutex::new(file),
            last: Mutex::new(last),
        })
    }

    /// Log location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in file order.
    pub fn read_all(&self) -> Result<Vec<RoundAuditRecord>, AuditError> {
        read_records(&self.path)
    }
}

fn read_records(path: &Path) -> Result<Vec<RoundAuditRecord>, AuditError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

impl AuditStore for JsonLinesAuditStore {
    fn append(&self, record: &RoundAuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock().map_err(|_| AuditError::Poisoned)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        *self.last.lock().map_err(|_| AuditError::Poisoned)? = Some(record.clone());
        Ok(())
    }

    fn last(&self) -> Result<Option<RoundAuditRecord>, AuditError> {
        let last = self.last.lock().map_err(|_| AuditError::Poisoned)?;
        Ok(last.clone())
    }

    fn find(&self, round_id: RoundId) -> Result<Option<RoundAuditRecord>, AuditError> {
        Ok(self.read_all()?.into_iter().find(|r| r.round_id == round_id))
    }
}

/// Async front for an `AuditStore`.
///
/// Records go through a channel to one task that appends them on the
/// blocking pool, one at a time, so the file order matches crash order and
/// the caller never waits on disk.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    records: mpsc::UnboundedSender<RoundAuditRecord>,
}

impl AuditWriter {
    /// Start the writer task. It drains the queue and exits once every
    /// `AuditWriter` clone is dropped.
    pub fn spawn(store: Arc<dyn AuditStore>) -> (Self, JoinHandle<()>) {
        let (records, mut rx) = mpsc::unbounded_channel::<RoundAuditRecord>();
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let round_id = record.round_id;
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.append(&record)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(round_id, "Failed to persist audit record: {}", e),
                    Err(e) => error!(round_id, "Audit append panicked: {}", e),
                }
            }
        });
        (Self { records }, task)
    }

    /// Queue a record.
    pub fn append(&self, record: RoundAuditRecord) {
        if let Err(mpsc::error::SendError(lost)) = self.records.send(record) {
            error!(round_id = lost.round_id, "Audit writer stopped, record not persisted");
        }
    }
}
