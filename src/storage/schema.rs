//! Database schema
//!
//! Applied on open; every statement is idempotent.

pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS decisions (
    id               TEXT PRIMARY KEY,
    url              TEXT NOT NULL,
    fingerprint      TEXT NOT NULL,
    feature_hash     TEXT NOT NULL,
    action           TEXT NOT NULL,
    confidence       REAL NOT NULL,
    allow_score      REAL NOT NULL,
    block_score      REAL NOT NULL,
    source           TEXT NOT NULL,
    explored         INTEGER NOT NULL DEFAULT 0,
    model_version    INTEGER NOT NULL,
    created_at_ms    INTEGER NOT NULL,
    state            TEXT NOT NULL,
    layout_signature TEXT,
    features         BLOB,
    UNIQUE (url, fingerprint)
);

CREATE INDEX IF NOT EXISTS idx_decisions_fingerprint ON decisions (fingerprint);
CREATE INDEX IF NOT EXISTS idx_decisions_created ON decisions (created_at_ms);

CREATE TABLE IF NOT EXISTS feedback (
    id               TEXT PRIMARY KEY,
    decision_id      TEXT NOT NULL,
    url              TEXT NOT NULL,
    feedback         TEXT NOT NULL,
    decided_action   TEXT NOT NULL,
    target_action    TEXT NOT NULL,
    reward           REAL NOT NULL,
    explored         INTEGER NOT NULL DEFAULT 0,
    received_at_ms   INTEGER NOT NULL,
    layout_signature TEXT,
    features         BLOB,
    consumed         INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_feedback_received ON feedback (received_at_ms);

CREATE TABLE IF NOT EXISTS mission_config (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    text            TEXT NOT NULL,
    fingerprint     TEXT NOT NULL,
    threshold       REAL NOT NULL,
    created_at_ms   INTEGER NOT NULL,
    session_minutes INTEGER,
    updated_at_ms   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
