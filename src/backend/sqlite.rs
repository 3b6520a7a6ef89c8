//! SQLite backend.
//!
//! Durable shard storage in a single `kv_store` table. Queries run on the
//! blocking pool so the async callers never stall a runtime worker.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, InterruptHandle, OpenFlags, OptionalExtension};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendResult, Record, EXPIRED_SENTINEL};
use crate::error::BackendError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv_store (
        key    TEXT PRIMARY KEY,
        value  TEXT NOT NULL,
        expiry INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS kv_store_expiry ON kv_store (expiry);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How often an aborted call re-sends the interrupt while its statement runs.
const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

/// SQLite-backed shard handle.
///
/// Expiry is stored as Unix milliseconds. `Clone` shares the connection.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    label: String,
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Where one call is on its way through the blocking pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for a blocking thread or the connection lock
    Queued,
    /// Holding the connection, statement in progress
    Running,
    /// Statement returned; the connection is about to be released
    Finished,
    /// Given up before it started; it will never run
    Abandoned,
}

/// Abandons its call when dropped or told to.
///
/// The blocking side only moves `Running -> Finished` while it still holds the
/// connection, so an interrupt sent under the phase lock can only hit this
/// call's own statement.
struct CallGuard {
    phase: Arc<Mutex<Phase>>,
    interrupt: Arc<InterruptHandle>,
}

impl CallGuard {
    /// Returns true when the call had not started and now never will.
    fn abandon(&self) -> bool {
        let mut phase = lock_phase(&self.phase);
        match *phase {
            Phase::Queued => {
                *phase = Phase::Abandoned;
                true
            }
            Phase::Running => {
                self.interrupt.interrupt();
                false
            }
            Phase::Finished | Phase::Abandoned => false,
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.abandon();
    }
}

fn lock_phase(phase: &Mutex<Phase>) -> MutexGuard<'_, Phase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SqliteBackend {
    /// Opens (or creates) a writable database and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets read-only replica connections see committed writes
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::wrap(conn, path.display().to_string()))
    }

    /// Opens an existing database without write access, for replica handles.
    pub fn open_read_only(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self::wrap(conn, format!("{} (read-only)", path.display())))
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> BackendResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::wrap(conn, ":memory:".to_string()))
    }

    fn wrap(conn: Connection, label: String) -> Self {
        Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
            label,
        }
    }

    /// Human-readable origin of this handle.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of physical rows, expired ones included.
    pub async fn row_count(&self) -> BackendResult<u64> {
        let count = self
            .run(&CancellationToken::new(), |conn| {
                conn.query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get::<_, i64>(0))
            })
            .await?;
        Ok(count as u64)
    }

    /// Runs `op` on the blocking pool.
    ///
    /// When `abort` fires, a call still waiting for the connection is dropped
    /// without touching the database and a running statement is interrupted.
    /// A statement that completed first keeps its result.
    async fn run<T, F>(&self, abort: &CancellationToken, op: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        if abort.is_cancelled() {
            return Err(BackendError::Interrupted);
        }

        let conn = Arc::clone(&self.conn);
        let label = self.label.clone();
        let phase = Arc::new(Mutex::new(Phase::Queued));
        let task_phase = Arc::clone(&phase);

        let mut task = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| BackendError::Unavailable(format!("{label}: connection lock poisoned: {e}")))?;
            {
                let mut phase = lock_phase(&task_phase);
                if *phase == Phase::Abandoned {
                    return Err(BackendError::Interrupted);
                }
                *phase = Phase::Running;
            }
            let result = op(&*guard);
            *lock_phase(&task_phase) = Phase::Finished;
            drop(guard);
            result.map_err(classify)
        });

        let call = CallGuard {
            phase,
            interrupt: Arc::clone(&self.interrupt),
        };

        tokio::select! {
            biased;
            joined = &mut task => return joined?,
            _ = abort.cancelled() => {}
        }

        if call.abandon() {
            return Err(BackendError::Interrupted);
        }
        // An interrupt sent before the statement's first step is lost, so
        // keep sending until the statement yields
        loop {
            tokio::select! {
                biased;
                joined = &mut task => return joined?,
                _ = tokio::time::sleep(INTERRUPT_RETRY) => {
                    call.abandon();
                }
            }
        }
    }
}

fn classify(err: rusqlite::Error) -> BackendError {
    match err {
        rusqlite::Error::SqliteFailure(ref cause, _) if cause.code == ErrorCode::OperationInterrupted => {
            BackendError::Interrupted
        }
        other => BackendError::Sqlite(other),
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> BackendResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| BackendError::CorruptRow(format!("expiry out of range: {ms}")))
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn ping(&self, abort: &CancellationToken) -> BackendResult<()> {
        self.run(abort, |conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .map(|_| ())
    }

    async fn fetch_live(
        &self,
        key: &str,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<Option<Record>> {
        let key = key.to_string();
        let now = to_millis(now);
        let row = self
            .run(abort, move |conn| {
                conn.query_row(
                    "SELECT key, value, expiry FROM kv_store WHERE key = ?1 AND expiry > ?2",
                    params![key, now],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?)),
                )
                .optional()
            })
            .await?;

        row.map(|(key, value, expiry)| {
            Ok(Record {
                key,
                value,
                expiry: from_millis(expiry)?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, record: &Record, abort: &CancellationToken) -> BackendResult<u64> {
        let Record { key, value, expiry } = record.clone();
        let expiry = to_millis(expiry);
        let changed = self
            .run(abort, move |conn| {
                conn.execute(
                    "INSERT INTO kv_store (key, value, expiry) VALUES (?1, ?2, ?3)
                     ON CONFLICT (key) DO UPDATE SET value = excluded.value, expiry = excluded.expiry",
                    params![key, value, expiry],
                )
            })
            .await?;
        Ok(changed as u64)
    }

    async fn expire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<u64> {
        let key = key.to_string();
        let now = to_millis(now);
        let sentinel = to_millis(EXPIRED_SENTINEL);
        let changed = self
            .run(abort, move |conn| {
                conn.execute(
                    "UPDATE kv_store SET expiry = ?1 WHERE key = ?2 AND expiry > ?3",
                    params![sentinel, key, now],
                )
            })
            .await?;
        Ok(changed as u64)
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<u64> {
        let now = to_millis(now);
        let removed = self
            .run(abort, move |conn| conn.execute("DELETE FROM kv_store WHERE expiry <= ?1", params![now]))
            .await?;
        Ok(removed as u64)
    }
}
