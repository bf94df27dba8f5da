//! Database schema for docdesk.

/// Idempotent schema applied on every open. Timestamps are unix milliseconds.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    display_name TEXT,
    email TEXT,
    role TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    token TEXT NOT NULL UNIQUE,
    participant_id TEXT,
    product_id TEXT,
    message_count INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    resolved_by_ai INTEGER NOT NULL DEFAULT 0
);

-- At most one open session per participant.
CREATE UNIQUE INDEX IF NOT EXISTS chat_sessions_one_open
    ON chat_sessions(participant_id)
    WHERE ended_at IS NULL AND participant_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS session_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS session_messages_dedup
    ON session_messages(session_id, role, content);

CREATE TABLE IF NOT EXISTS conversations (
    key TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_message TEXT,
    last_message_at INTEGER,
    last_sender_id TEXT
);

CREATE TABLE IF NOT EXISTS conversation_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_key TEXT NOT NULL REFERENCES conversations(key) ON DELETE CASCADE,
    sender_id TEXT,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS conversation_messages_by_key
    ON conversation_messages(conversation_key, created_at);

CREATE TABLE IF NOT EXISTS feedback (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE REFERENCES chat_sessions(id) ON DELETE CASCADE,
    participant_id TEXT NOT NULL,
    rating TEXT NOT NULL,
    comment TEXT,
    created_at INTEGER NOT NULL
);
"#;
