//! History database schema definitions.

/// Schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create the history schema.
///
/// `id` is the insertion-order tiebreaker for envelopes sharing a
/// `created_at` millisecond.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS envelopes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id BLOB NOT NULL UNIQUE,
    from_identity TEXT NOT NULL,
    to_identity TEXT NOT NULL,
    ciphertext BLOB NOT NULL,
    nonce BLOB NOT NULL,
    tag BLOB,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_envelopes_created ON envelopes(created_at);
CREATE INDEX IF NOT EXISTS idx_envelopes_from_to ON envelopes(from_identity, to_identity, created_at);
CREATE INDEX IF NOT EXISTS idx_envelopes_to_from ON envelopes(to_identity, from_identity, created_at);
"#;
