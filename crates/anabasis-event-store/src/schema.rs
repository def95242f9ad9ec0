//! Event log database schema.

/// Key of the advisory lock every writer holds until it commits.
pub const WRITER_LOCK_KEY: i64 = 0x616e_6162_6173_6973;

/// SQL creating the stream and event tables.
pub const CREATE_EVENT_LOG: &str = r"
CREATE TABLE IF NOT EXISTS streams (
    stream_id TEXT PRIMARY KEY,
    version   BIGINT NOT NULL DEFAULT -1,
    deleted   BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS event_log (
    position        BIGSERIAL PRIMARY KEY,
    stream_id       TEXT NOT NULL REFERENCES streams (stream_id),
    sequence_number BIGINT NOT NULL,
    event_id        UUID NOT NULL UNIQUE,
    event_type      VARCHAR(255) NOT NULL,
    data            BYTEA NOT NULL,
    metadata        BYTEA NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (stream_id, sequence_number)
);
";
