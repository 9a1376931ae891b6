//! Pluggable persistence for established sessions.
//!
//! A [`SessionRecord`] holds exactly what is needed to re-derive the session
//! key: our secret key and the peer's public key, keyed by the unordered
//! identity pair.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use crate::identity::PairKey;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Persisted key material for one conversation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionRecord {
    /// Our X25519 secret key bytes.
    pub secret_key: [u8; KEY_SIZE],
    /// The peer's X25519 public key bytes.
    pub peer_public: [u8; KEY_SIZE],
    /// Unix timestamp of the last save.
    pub updated_at: i64,
}

impl SessionRecord {
    /// Build a record stamped with the current time.
    pub fn new(secret_key: [u8; KEY_SIZE], peer_public: [u8; KEY_SIZE]) -> Self {
        Self {
            secret_key,
            peer_public,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("secret_key", &"[REDACTED]")
            .field("peer_public", &hex::encode(&self.peer_public[..8]))
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Session persistence strategy.
///
/// Deliberately minimal so a future per-message key-rotation scheme can slot
/// in behind the same interface.
pub trait SessionStore: Send {
    /// Save (or replace) the record for a pair.
    fn save(&self, pair: &PairKey, record: &SessionRecord) -> Result<()>;
    /// Load the record for a pair, if one was persisted.
    fn load(&self, pair: &PairKey) -> Result<Option<SessionRecord>>;
    /// Remove the record for a pair. Returns whether one existed.
    fn delete(&self, pair: &PairKey) -> Result<bool>;
}

// A shared reference is itself a store, so several managers (or a manager and
// a test harness) can persist through one instance.
impl<S: SessionStore + Sync> SessionStore for &S {
    fn save(&self, pair: &PairKey, record: &SessionRecord) -> Result<()> {
        (**self).save(pair, record)
    }
    fn load(&self, pair: &PairKey) -> Result<Option<SessionRecord>> {
        (**self).load(pair)
    }
    fn delete(&self, pair: &PairKey) -> Result<bool> {
        (**self).delete(pair)
    }
}

/// In-memory store for tests and ephemeral clients.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_err<T>(_: T) -> Error {
    Error::Persistence("session store lock poisoned".into())
}

impl SessionStore for MemorySessionStore {
    fn save(&self, pair: &PairKey, record: &SessionRecord) -> Result<()> {
        let mut inner = self.inner.lock().map_err(lock_err)?;
        inner.insert(pair.storage_key(), record.clone());
        Ok(())
    }

    fn load(&self, pair: &PairKey) -> Result<Option<SessionRecord>> {
        let inner = self.inner.lock().map_err(lock_err)?;
        Ok(inner.get(&pair.storage_key()).cloned())
    }

    fn delete(&self, pair: &PairKey) -> Result<bool> {
        let mut inner = self.inner.lock().map_err(lock_err)?;
        Ok(inner.remove(&pair.storage_key()).is_some())
    }
}

/// SQLite-backed store for sessions that survive restarts.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

const CREATE_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    pair TEXT PRIMARY KEY,
    secret_key BLOB NOT NULL,
    peer_public BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

impl SqliteSessionStore {
    /// Open or create a session database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::init(conn)
    }

    /// Open an in-memory session database (for tests).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_SESSIONS)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl SessionStore for SqliteSessionStore {
    fn save(&self, pair: &PairKey, record: &SessionRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (pair, secret_key, peer_public, updated_at) \
             VALUES (?, ?, ?, ?)",
            params![
                pair.storage_key(),
                record.secret_key.as_slice(),
                record.peer_public.as_slice(),
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn load(&self, pair: &PairKey) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn.prepare(
            "SELECT secret_key, peer_public, updated_at FROM sessions WHERE pair = ?",
        )?;

        let result = stmt.query_row(params![pair.storage_key()], |row| {
            let secret: Vec<u8> = row.get(0)?;
            let public: Vec<u8> = row.get(1)?;
            let updated_at: i64 = row.get(2)?;
            Ok((secret, public, updated_at))
        });

        match result {
            Ok((secret, public, updated_at)) => {
                let secret_key: [u8; KEY_SIZE] = secret
                    .try_into()
                    .map_err(|_| Error::Persistence("corrupt session secret".into()))?;
                let peer_public: [u8; KEY_SIZE] = public
                    .try_into()
                    .map_err(|_| Error::Persistence("corrupt peer public key".into()))?;
                Ok(Some(SessionRecord { secret_key, peer_public, updated_at }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, pair: &PairKey) -> Result<bool> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let rows = conn.execute(
            "DELETE FROM sessions WHERE pair = ?",
            params![pair.storage_key()],
        )?;
        Ok(rows > 0)
    }
}
