//! SQLite-backed envelope store.

use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use super::{Envelope, MessageId};
use crate::error::{Error, Result};
use crate::identity::Identity;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;

/// History database configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Path to the database file.
    pub path: String,
    /// Whether to use an in-memory database (for testing).
    pub in_memory: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: "sealchat.db".to_string(),
            in_memory: false,
        }
    }
}

/// Append-only envelope store handle.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Open or create the history database.
    pub fn open(config: &HistoryConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Persistence(format!("failed to create directory: {}", e)))?;
            }
            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
        }
        .map_err(|e| Error::Persistence(format!("failed to open database: {}", e)))?;

        // WAL lets history reads proceed while appends are in flight.
        if !config.in_memory {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        conn.execute_batch(CREATE_SCHEMA)
            .map_err(|e| Error::Persistence(format!("failed to create schema: {}", e)))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self { conn })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(&HistoryConfig {
            path: String::new(),
            in_memory: true,
        })
    }

    /// Append a new envelope; assigns `message_id` and `created_at`.
    ///
    /// Ciphertext, nonce and tag are stored verbatim.
    pub fn append(
        &self,
        from: &Identity,
        to: &Identity,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: Option<&[u8]>,
    ) -> Result<Envelope> {
        let message_id = MessageId::random();
        let created_at = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                r#"
                INSERT INTO envelopes
                (message_id, from_identity, to_identity, ciphertext, nonce, tag, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    message_id.as_bytes().as_slice(),
                    from.as_str(),
                    to.as_str(),
                    ciphertext,
                    nonce,
                    tag,
                    created_at,
                ],
            )
            .map_err(|e| Error::Persistence(format!("failed to append envelope: {}", e)))?;

        Ok(Envelope {
            message_id,
            from: from.clone(),
            to: to.clone(),
            ciphertext: ciphertext.to_vec(),
            nonce: nonce.to_vec(),
            tag: tag.map(<[u8]>::to_vec),
            created_at,
        })
    }

    /// The most recent `limit` envelopes exchanged between a pair of
    /// identities, oldest first. Symmetric in the pair.
    pub fn between(&self, a: &Identity, b: &Identity, limit: u32) -> Result<Vec<Envelope>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT message_id, from_identity, to_identity, ciphertext, nonce, tag, created_at
            FROM envelopes
            WHERE (from_identity = ?1 AND to_identity = ?2)
               OR (from_identity = ?2 AND to_identity = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
        )?;

        let mut envelopes = collect_envelopes(stmt.query_map(
            params![a.as_str(), b.as_str(), limit],
            envelope_from_row,
        )?)?;

        // Newest-first page flipped to chronological order.
        envelopes.reverse();
        Ok(envelopes)
    }

    /// The most recent `limit` envelopes across all conversations, newest
    /// first. For operational inspection; never contains plaintext because
    /// none is ever stored.
    pub fn recent(&self, limit: u32) -> Result<Vec<Envelope>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT message_id, from_identity, to_identity, ciphertext, nonce, tag, created_at
            FROM envelopes
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )?;

        let envelopes = collect_envelopes(stmt.query_map(params![limit], envelope_from_row)?)?;
        Ok(envelopes)
    }

    /// Total number of stored envelopes.
    pub fn message_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM envelopes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

type RawEnvelope = (Vec<u8>, String, String, Vec<u8>, Vec<u8>, Option<Vec<u8>>, i64);

fn envelope_from_row(row: &Row<'_>) -> rusqlite::Result<RawEnvelope> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn collect_envelopes<I>(rows: I) -> Result<Vec<Envelope>>
where
    I: Iterator<Item = rusqlite::Result<RawEnvelope>>,
{
    let mut envelopes = Vec::new();
    for row in rows {
        let (id, from, to, ciphertext, nonce, tag, created_at) = row?;
        envelopes.push(Envelope {
            message_id: MessageId::from_slice(&id)?,
            from: Identity::new(from)?,
            to: Identity::new(to)?,
            ciphertext,
            nonce,
            tag,
            created_at,
        });
    }
    Ok(envelopes)
}
