//! SQLite schema definition
//!
//! The index is a cache of the transcript files: bumping
//! `SCHEMA_VERSION` drops every table and the next scan repopulates them.

pub const SCHEMA_VERSION: i64 = 1;

pub const DROP_ALL: &str = r#"
DROP TABLE IF EXISTS messages;
DROP TABLE IF EXISTS sessions;
"#;

pub const SCHEMA: &str = r#"
-- ============================================
-- SESSIONS
-- ============================================

-- One row per transcript file
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,                   -- '{source}:{external_id}'
    source TEXT NOT NULL,                  -- 'codex' | 'claude'
    external_id TEXT NOT NULL,
    cwd TEXT,
    title TEXT NOT NULL,
    started_at_ms INTEGER,
    last_activity_ms INTEGER,
    message_count INTEGER NOT NULL DEFAULT 0,
    file_path TEXT NOT NULL UNIQUE,
    file_mtime_ms INTEGER NOT NULL,        -- change-detection signature
    file_size INTEGER NOT NULL,
    content_hash TEXT NOT NULL,            -- SHA-256 hex of the file bytes
    parser_version INTEGER NOT NULL,
    search_text TEXT NOT NULL DEFAULT '',  -- lowercased title + message texts
    indexed_at DATETIME
);

-- ============================================
-- MESSAGES
-- ============================================

CREATE TABLE IF NOT EXISTS messages (
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,                  -- 0-based, source-file order
    role TEXT NOT NULL,                    -- 'user', 'assistant', 'system', 'developer', 'tool', 'other'
    kind TEXT,                             -- 'message', 'reasoning', 'tool_use', 'tool_result', 'context'
    ts_ms INTEGER,
    text TEXT NOT NULL,
    PRIMARY KEY(session_id, seq),
    FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_sessions_source ON sessions(source);
CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at_ms DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_last_activity ON sessions(last_activity_ms DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_cwd ON sessions(cwd);

CREATE INDEX IF NOT EXISTS idx_messages_role ON messages(role);
"#;
