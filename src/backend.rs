//! SQLite backing store
//!
//! One [`SqliteStore`] owns exactly one rusqlite [`Connection`] guarded by a
//! re-entrant mutex. Every unit of work runs with the lock held; mutations
//! run inside [`SqliteStore::transaction`], which nests through savepoints
//! so that higher-level operations can call lower-level ones on the same
//! thread without deadlocking or committing halfway.

use crate::config::StoreConfig;
use crate::error::{Result, VfsError};
use crate::schema::{ROOT_PATH, SCHEMA};
use chrono::{SecondsFormat, Utc};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::cell::Cell;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a writer waits for another connection's lock on the same file
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection plus the nesting depth of the open transaction, if any
pub(crate) struct Session {
    conn: Connection,
    depth: Cell<u32>,
}

/// SQLite store for one virtual file system
///
/// Provides embedded, single-file storage with ACID guarantees.
pub struct SqliteStore {
    session: ReentrantMutex<Session>,
    config: StoreConfig,
}

impl SqliteStore {
    /// Open (and for writable stores, initialize) the database described
    /// by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let conn = if config.is_memory() {
            Connection::open_in_memory()?
        } else if config.read_only {
            Connection::open_with_flags(
                &config.location,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            Connection::open(&config.location)?
        };

        // Chunk rows cascade with their inode
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        debug!(location = %config.location, read_only = config.read_only, "opened database");

        // An in-memory read-only store still needs a root to be useful
        if !config.read_only || config.is_memory() {
            Self::migrate(&conn)?;
        }

        Ok(Self {
            session: ReentrantMutex::new(Session {
                conn,
                depth: Cell::new(0),
            }),
            config,
        })
    }

    /// Create tables and the root inode if missing
    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA)?;
        let now = timestamp();
        conn.execute(
            "INSERT OR IGNORE INTO inodes (path, is_directory, created_at, modified_at, size)
             VALUES (?1, 1, ?2, ?2, 0)",
            params![ROOT_PATH, now],
        )?;
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub(crate) fn ensure_writable(&self, path: &str) -> Result<()> {
        if self.config.read_only {
            return Err(VfsError::PermissionDenied(format!("store is read-only: {path}")));
        }
        Ok(())
    }

    /// Hold the store lock for a caller-defined unit of work.
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, Session> {
        self.session.lock()
    }

    /// Run read-only work against the connection with the lock held.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let session = self.session.lock();
        f(&session.conn)
    }

    /// Run `f` atomically.
    ///
    /// The outermost call on a thread opens `BEGIN IMMEDIATE` and commits on
    /// `Ok`; nested calls open a savepoint that is rolled back on `Err`
    /// without disturbing the enclosing work. Any `Err` (or a panic) at the
    /// outermost level rolls back everything.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if self.config.read_only {
            return Err(VfsError::PermissionDenied(format!(
                "store is read-only: {}",
                self.config.location
            )));
        }

        let session = self.session.lock();
        let depth = session.depth.get();

        if depth == 0 {
            session.conn.execute_batch("BEGIN IMMEDIATE")?;
        } else {
            session
                .conn
                .execute_batch(&format!("SAVEPOINT sqlvfs_{depth}"))?;
        }
        let mut scope = Scope {
            session: &*session,
            depth,
            finished: false,
        };
        session.depth.set(depth + 1);

        let result = f(&session.conn);
        match &result {
            Ok(_) => scope.commit()?,
            Err(e) => {
                if depth == 0 {
                    warn!(error = %e, "transaction rolled back");
                }
                scope.rollback()?;
            }
        }
        result
    }

    /// Wait for any in-flight unit of work on the store to finish.
    ///
    /// Every transaction commits when it returns, so there is nothing left
    /// to write once the lock is acquired.
    pub fn flush(&self) {
        let _session = self.session.lock();
    }

    /// Ask SQLite to checkpoint the write-ahead log when the database file
    /// has been switched to WAL mode by another opener; a no-op otherwise.
    pub fn sync(&self) -> Result<()> {
        let session = self.session.lock();
        if session.depth.get() > 0 {
            return Ok(());
        }
        let checkpoint = session
            .conn
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |row| row.get::<_, i64>(0))
            .optional();
        if let Err(e) = checkpoint {
            debug!(error = %e, "wal checkpoint skipped");
        }
        Ok(())
    }
}

/// Open transaction or savepoint; rolls back on drop unless finished.
struct Scope<'a> {
    session: &'a Session,
    depth: u32,
    finished: bool,
}

impl Scope<'_> {
    fn commit(&mut self) -> Result<()> {
        self.finished = true;
        self.session.depth.set(self.depth);
        let sql = if self.depth == 0 {
            "COMMIT".to_string()
        } else {
            format!("RELEASE sqlvfs_{}", self.depth)
        };
        if let Err(e) = self.session.conn.execute_batch(&sql) {
            self.undo();
            return Err(e.into());
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.finished = true;
        self.session.depth.set(self.depth);
        self.undo_checked()
    }

    fn undo_checked(&self) -> Result<()> {
        let sql = if self.depth == 0 {
            "ROLLBACK".to_string()
        } else {
            format!("ROLLBACK TO sqlvfs_{d}; RELEASE sqlvfs_{d}", d = self.depth)
        };
        self.session.conn.execute_batch(&sql)?;
        Ok(())
    }

    fn undo(&self) {
        if let Err(e) = self.undo_checked() {
            warn!(error = %e, depth = self.depth, "rollback failed");
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.depth.set(self.depth);
            self.undo();
        }
    }
}

/// Current time as stored in `created_at` / `modified_at`
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
