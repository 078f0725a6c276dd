// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Bounded SQLite connection pool.
//!
//! A semaphore caps the number of checked-out connections at `size`; idle
//! connections are kept in a stack and opened lazily. A checked-out
//! [`PooledConnection`] is returned on drop, on every exit path.

use crate::errors::StoreError;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
pub struct ConnectionPool {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl ConnectionPool {
    pub fn new(path: impl AsRef<Path>, size: usize, busy_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Waits for a free slot, then hands out an idle or freshly opened connection.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, StoreError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Unavailable("connection pool closed".into()))?;

        let idle = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let (path, busy_timeout) = (self.path.clone(), self.busy_timeout);
                tokio::task::spawn_blocking(move || open(&path, busy_timeout))
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("blocking open failed: {e}")))??
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
    }

    /// Drops every idle connection. Checked-out ones are closed when returned.
    pub fn clear_idle(&self) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
    }
}

/// Opens and configures one connection. Blocking; runs off the async workers.
fn open(path: &Path, busy_timeout: Duration) -> Result<Connection, StoreError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    tracing::debug!(path = %path.display(), "Opened SQLite connection");
    Ok(conn)
}

/// A checked-out connection. Returns itself to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn conn(&mut self) -> &mut Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }

    /// Closes the connection instead of returning it, e.g. after an I/O error.
    pub fn discard(mut self) {
        self.conn.take();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
