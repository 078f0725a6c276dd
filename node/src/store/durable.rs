// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! SQLite-backed durable store.
//!
//! All statements run on the blocking pool through [`DurableStore::run`],
//! bounded by the operation timeout. Appends take an `IMMEDIATE` transaction,
//! read the tail, link, insert and commit; the unique indexes on
//! `(anchor_id, height)` and `(anchor_id, prev_hash)` back the compare-and-swap
//! for writers in other processes.

use super::pool::ConnectionPool;
use super::{link, HeightRange, LedgerStore, PendingAppend, RecordStream, READ_PAGE_SIZE};
use crate::config::{BackendKind, LedgerConfig};
use crate::errors::StoreError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use sovereign_ledger::checkpoint::{Checkpoint, CheckpointDraft, RecordRange};
use sovereign_ledger::{Digest, Record, RecordId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ledger_records (
    id              BLOB PRIMARY KEY,
    anchor_id       TEXT NOT NULL,
    height          INTEGER NOT NULL,
    kind            TEXT NOT NULL,
    ts              INTEGER NOT NULL,
    prev_hash       BLOB NOT NULL,
    hash            BLOB NOT NULL UNIQUE,
    payload         BLOB NOT NULL,
    signature       BLOB,
    producer        TEXT NOT NULL,
    schema_version  INTEGER NOT NULL,
    UNIQUE (anchor_id, height),
    UNIQUE (anchor_id, prev_hash)
);
CREATE INDEX IF NOT EXISTS idx_ledger_records_anchor_ts ON ledger_records (anchor_id, ts);

CREATE TABLE IF NOT EXISTS ledger_checkpoints (
    sequence        INTEGER PRIMARY KEY,
    anchor_id       TEXT NOT NULL,
    range_start     BLOB NOT NULL,
    range_end       BLOB NOT NULL,
    record_count    INTEGER NOT NULL,
    merkle_root     BLOB NOT NULL,
    created_at      INTEGER NOT NULL,
    checkpoint_hash BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ledger_checkpoints_anchor ON ledger_checkpoints (anchor_id, sequence);
";

const RECORD_COLUMNS: &str =
    "id, anchor_id, height, kind, ts, prev_hash, hash, payload, signature, producer, schema_version";

const CHECKPOINT_COLUMNS: &str =
    "sequence, anchor_id, range_start, range_end, record_count, merkle_root, created_at, checkpoint_hash";

#[derive(Debug, Clone)]
pub struct DurableStore {
    path: PathBuf,
    pool: Arc<ConnectionPool>,
    schema_ready: Arc<AtomicBool>,
    op_timeout: Duration,
    health_timeout: Duration,
}

impl DurableStore {
    /// Lazy handle: nothing is opened until the first operation, which also
    /// applies the schema.
    pub fn new(path: impl AsRef<Path>, pool_size: usize, op_timeout: Duration, health_timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            // SQLite waits out lock contention past `op_timeout`, so a held
            // lock surfaces as `Timeout` rather than a busy error.
            pool: ConnectionPool::new(&path, pool_size, op_timeout * 2),
            schema_ready: Arc::new(AtomicBool::new(false)),
            op_timeout,
            health_timeout,
        }
    }

    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub async fn open(
        path: impl AsRef<Path>,
        pool_size: usize,
        op_timeout: Duration,
        health_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::new(path, pool_size, op_timeout, health_timeout);
        store.run(op_timeout, |_| Ok(())).await?;
        tracing::info!(path = %store.path.display(), pool_size, "Durable store ready");
        Ok(store)
    }

    pub fn from_config(cfg: &LedgerConfig) -> Result<Self, StoreError> {
        let path = cfg
            .durable_path()
            .ok_or_else(|| StoreError::Unavailable("no durable_url configured".into()))?;
        Ok(Self::new(path, cfg.pool_size, cfg.op_timeout(), cfg.health_timeout()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` on a pooled connection on the blocking pool, bounded by `limit`
    /// (covering both the wait for a connection and the work itself).
    async fn run<T, F>(&self, limit: Duration, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let work = async {
            let mut guard = self.pool.acquire().await?;
            let schema_ready = Arc::clone(&self.schema_ready);
            let handle = tokio::task::spawn_blocking(move || {
                let result = ensure_schema(guard.conn(), &schema_ready).and_then(|()| f(guard.conn()));
                if matches!(result, Err(StoreError::Unavailable(_))) {
                    guard.discard();
                }
                result
            });
            handle
                .await
                .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
        };
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }
}

fn ensure_schema(conn: &mut Connection, ready: &AtomicBool) -> Result<(), StoreError> {
    if !ready.load(Ordering::Acquire) {
        conn.execute_batch(SCHEMA)?;
        ready.store(true, Ordering::Release);
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for DurableStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    async fn append(&self, pending: PendingAppend) -> Result<Record, StoreError> {
        self.run(self.op_timeout, move |conn| {
            let anchor_id = pending.record.anchor_id.clone();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let tail = query_one(
                &tx,
                &format!("SELECT {RECORD_COLUMNS} FROM ledger_records WHERE anchor_id = ?1 ORDER BY height DESC LIMIT 1"),
                params![anchor_id],
            )?;
            let record = link(pending, tail.as_ref())?;
            tx.execute(
                &format!("INSERT INTO ledger_records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    &record.id.to_be_bytes()[..],
                    record.anchor_id,
                    record.height as i64,
                    record.kind,
                    record.timestamp as i64,
                    &record.prev_hash.as_bytes()[..],
                    &record.hash.as_bytes()[..],
                    record.payload,
                    record.signature.as_deref(),
                    record.producer,
                    record.schema_version,
                ],
            )
            .map_err(|e| insert_error(e, &anchor_id))?;
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    async fn tail(&self, anchor_id: &str) -> Result<Option<Record>, StoreError> {
        let anchor_id = anchor_id.to_string();
        self.run(self.op_timeout, move |conn| {
            query_one(
                conn,
                &format!("SELECT {RECORD_COLUMNS} FROM ledger_records WHERE anchor_id = ?1 ORDER BY height DESC LIMIT 1"),
                params![anchor_id],
            )
        })
        .await
    }

    async fn get(&self, anchor_id: &str, id: RecordId) -> Result<Option<Record>, StoreError> {
        let anchor_id = anchor_id.to_string();
        self.run(self.op_timeout, move |conn| {
            query_one(
                conn,
                &format!("SELECT {RECORD_COLUMNS} FROM ledger_records WHERE anchor_id = ?1 AND id = ?2"),
                params![anchor_id, &id.to_be_bytes()[..]],
            )
        })
        .await
    }

    async fn record_at(&self, anchor_id: &str, height: u64) -> Result<Option<Record>, StoreError> {
        let anchor_id = anchor_id.to_string();
        self.run(self.op_timeout, move |conn| {
            query_one(
                conn,
                &format!("SELECT {RECORD_COLUMNS} FROM ledger_records WHERE anchor_id = ?1 AND height = ?2"),
                params![anchor_id, height as i64],
            )
        })
        .await
    }

    fn read_range(self: Arc<Self>, anchor_id: String, range: HeightRange) -> RecordStream {
        // One short query per page; no cursor or connection outlives a page.
        let to = range.to.map_or(i64::MAX, |t| t.min(i64::MAX as u64) as i64);
        stream::try_unfold(Some(range.from), move |next| {
            let store = Arc::clone(&self);
            let anchor = anchor_id.clone();
            async move {
                let Some(from) = next else {
                    return Ok::<_, StoreError>(None);
                };
                let page = store
                    .run(store.op_timeout, move |conn| {
                        let sql = format!(
                            "SELECT {RECORD_COLUMNS} FROM ledger_records \
                             WHERE anchor_id = ?1 AND height >= ?2 AND height <= ?3 \
                             ORDER BY height LIMIT ?4"
                        );
                        let mut stmt = conn.prepare_cached(&sql)?;
                        let rows = stmt.query_map(params![anchor, from as i64, to, READ_PAGE_SIZE as i64], raw_record)?;
                        let records = rows.map(|row| row?.into_record()).collect::<Result<Vec<_>, _>>();
                        records
                    })
                    .await?;

                let next = match page.last() {
                    Some(last) if page.len() == READ_PAGE_SIZE => Some(last.height + 1),
                    Some(_) => None,
                    None => return Ok(None),
                };
                Ok(Some((stream::iter(page.into_iter().map(Ok)), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn append_checkpoint(&self, draft: CheckpointDraft) -> Result<Checkpoint, StoreError> {
        self.run(self.op_timeout, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let last: i64 = tx.query_row("SELECT COALESCE(MAX(sequence), 0) FROM ledger_checkpoints", [], |r| r.get(0))?;
            let cp = draft.seal(last as u64 + 1);
            tx.execute(
                &format!("INSERT INTO ledger_checkpoints ({CHECKPOINT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    cp.sequence as i64,
                    cp.anchor_id,
                    &cp.record_range.start_id.to_be_bytes()[..],
                    &cp.record_range.end_id.to_be_bytes()[..],
                    cp.record_count as i64,
                    &cp.merkle_root.as_bytes()[..],
                    cp.created_at as i64,
                    &cp.checkpoint_hash.as_bytes()[..],
                ],
            )?;
            tx.commit()?;
            Ok(cp)
        })
        .await
    }

    async fn latest_checkpoint(&self, anchor_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let anchor_id = anchor_id.to_string();
        self.run(self.op_timeout, move |conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {CHECKPOINT_COLUMNS} FROM ledger_checkpoints \
                         WHERE anchor_id = ?1 ORDER BY sequence DESC LIMIT 1"
                    ),
                    params![anchor_id],
                    raw_checkpoint,
                )
                .optional()?;
            raw.map(RawCheckpoint::into_checkpoint).transpose()
        })
        .await
    }

    async fn anchors(&self) -> Result<Vec<String>, StoreError> {
        self.run(self.op_timeout, |conn| {
            let mut stmt = conn.prepare_cached("SELECT DISTINCT anchor_id FROM ledger_records ORDER BY anchor_id")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            let anchors = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(anchors)
        })
        .await
    }

    async fn health(&self) -> bool {
        let probe = self
            .run(self.health_timeout, |conn| {
                Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?)
            })
            .await;
        match probe {
            Ok(1) => true,
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(error = %e, "Durable health probe failed");
                false
            }
        }
    }
}

fn insert_error(e: rusqlite::Error, anchor_id: &str) -> StoreError {
    match e.sqlite_error_code() {
        // Another process linked onto the same tail first.
        Some(ErrorCode::ConstraintViolation) => StoreError::TailChanged {
            anchor_id: anchor_id.to_string(),
            expected: None,
            actual: None,
        },
        _ => e.into(),
    }
}

fn query_one(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Option<Record>, StoreError> {
    let raw = conn.query_row(sql, params, raw_record).optional()?;
    raw.map(RawRecord::into_record).transpose()
}

struct RawRecord {
    id: Vec<u8>,
    anchor_id: String,
    height: i64,
    kind: String,
    ts: i64,
    prev_hash: Vec<u8>,
    hash: Vec<u8>,
    payload: Vec<u8>,
    signature: Option<Vec<u8>>,
    producer: String,
    schema_version: u32,
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        anchor_id: row.get(1)?,
        height: row.get(2)?,
        kind: row.get(3)?,
        ts: row.get(4)?,
        prev_hash: row.get(5)?,
        hash: row.get(6)?,
        payload: row.get(7)?,
        signature: row.get(8)?,
        producer: row.get(9)?,
        schema_version: row.get(10)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Result<Record, StoreError> {
        Ok(Record {
            id: record_id(&self.id)?,
            anchor_id: self.anchor_id,
            height: non_negative(self.height, "height")?,
            kind: self.kind,
            timestamp: non_negative(self.ts, "ts")?,
            prev_hash: digest(&self.prev_hash, "prev_hash")?,
            hash: digest(&self.hash, "hash")?,
            payload: self.payload,
            signature: self.signature,
            producer: self.producer,
            schema_version: self.schema_version,
        })
    }
}

struct RawCheckpoint {
    sequence: i64,
    anchor_id: String,
    range_start: Vec<u8>,
    range_end: Vec<u8>,
    record_count: i64,
    merkle_root: Vec<u8>,
    created_at: i64,
    checkpoint_hash: Vec<u8>,
}

fn raw_checkpoint(row: &Row<'_>) -> rusqlite::Result<RawCheckpoint> {
    Ok(RawCheckpoint {
        sequence: row.get(0)?,
        anchor_id: row.get(1)?,
        range_start: row.get(2)?,
        range_end: row.get(3)?,
        record_count: row.get(4)?,
        merkle_root: row.get(5)?,
        created_at: row.get(6)?,
        checkpoint_hash: row.get(7)?,
    })
}

impl RawCheckpoint {
    fn into_checkpoint(self) -> Result<Checkpoint, StoreError> {
        let cp = Checkpoint {
            sequence: non_negative(self.sequence, "sequence")?,
            anchor_id: self.anchor_id,
            record_range: RecordRange {
                start_id: record_id(&self.range_start)?,
                end_id: record_id(&self.range_end)?,
            },
            record_count: non_negative(self.record_count, "record_count")?,
            merkle_root: digest(&self.merkle_root, "merkle_root")?,
            created_at: non_negative(self.created_at, "created_at")?,
            checkpoint_hash: digest(&self.checkpoint_hash, "checkpoint_hash")?,
        };
        if !cp.is_sealed() {
            return Err(StoreError::Corrupt(format!(
                "checkpoint {} does not match its checkpoint_hash",
                cp.sequence
            )));
        }
        Ok(cp)
    }
}

fn record_id(bytes: &[u8]) -> Result<RecordId, StoreError> {
    let arr: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("record id has {} bytes, expected 16", bytes.len())))?;
    Ok(RecordId::from_be_bytes(arr))
}

fn digest(bytes: &[u8], column: &str) -> Result<Digest, StoreError> {
    Digest::from_slice(bytes)
        .ok_or_else(|| StoreError::Corrupt(format!("{column} has {} bytes, expected 32", bytes.len())))
}

fn non_negative(v: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("{column} is negative")))
}
