use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL,
            username    TEXT NOT NULL UNIQUE,
            avatar_url  TEXT,
            role        TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            description TEXT,
            is_public   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            sender_id   TEXT NOT NULL REFERENCES profiles(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT,
            deleted_at  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE TABLE IF NOT EXISTS message_edits (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            edited_by   TEXT NOT NULL,
            edited_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_message_edits_message
            ON message_edits(message_id, edited_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
