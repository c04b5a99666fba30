use rusqlite::{Connection, Result};

/// Initialize the database schema with required tables
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS watchers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            token_address TEXT NOT NULL,
            threshold TEXT NOT NULL,
            decimals INTEGER NOT NULL DEFAULT 18,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Config is the kind-specific JSON payload, validated before insert
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            watcher_id INTEGER NOT NULL REFERENCES watchers(id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN ('slack', 'discord', 'telegram', 'email')),
            config TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transfer_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            watcher_id INTEGER NOT NULL REFERENCES watchers(id) ON DELETE CASCADE,
            token_address TEXT NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            amount TEXT NOT NULL,
            transaction_hash TEXT NOT NULL,
            block_number INTEGER NOT NULL,
            usd_value REAL,
            created_at INTEGER NOT NULL,
            UNIQUE(watcher_id, transaction_hash)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_watchers_active ON watchers(active)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transports_watcher ON transports(watcher_id)",
        [],
    )?;

    // Serves the scan cursor lookup
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_watcher_block ON transfer_events(watcher_id, block_number)",
        [],
    )?;

    Ok(())
}
