use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde_json::Value;

use crate::config::DatabaseConfig;
use crate::database::schema::initialize_schema;
use crate::error::{AlertError, PersistenceError};
use crate::logging::LogContext;
use crate::models::watcher::validate_threshold;
use crate::models::{EventInsert, NewTransferEvent, NewWatcher, Transport, TransportConfig, TransportKind, TransferEvent, Watcher};
use crate::blockchain::transfer_detector::normalize_address;

const EVENT_COLUMNS: &str = "id, watcher_id, token_address, from_address, to_address, amount, \
                             transaction_hash, block_number, usd_value, created_at";

const WATCHER_COLUMNS: &str = "id, user_id, name, token_address, threshold, decimals, active, created_at";

/// SQLite-backed watcher registry and event store
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file and initialize the schema
    pub fn new(db_path: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database for testing
    pub fn new_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Open a database file with WAL mode and busy timeout from the settings
    pub fn open_with_config(config: &DatabaseConfig) -> Result<Self, PersistenceError> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms as u64))?;
        if config.enable_wal_mode {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            LogContext::new("database", "open")
                .with_metadata("journal_mode", serde_json::json!(mode))
                .debug("Journal mode configured");
        }
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        // Needed for the ON DELETE CASCADE clauses
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::Lock("Failed to acquire database lock".to_string()))
    }

    // Watchers

    /// Validate and store a new watcher
    pub fn create_watcher(&self, new_watcher: &NewWatcher) -> Result<Watcher, AlertError> {
        new_watcher.validate()?;

        let conn = self.lock()?;
        let token_address = normalize_address(&new_watcher.token_address);
        let created_at = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO watchers (user_id, name, token_address, threshold, decimals, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                new_watcher.user_id,
                new_watcher.name,
                token_address,
                new_watcher.threshold.trim(),
                new_watcher.decimals,
                created_at
            ],
        )
        .map_err(PersistenceError::from)?;

        Ok(Watcher {
            id: conn.last_insert_rowid(),
            user_id: new_watcher.user_id.clone(),
            name: new_watcher.name.clone(),
            token_address,
            threshold: new_watcher.threshold.trim().to_string(),
            decimals: new_watcher.decimals,
            active: true,
            created_at,
            transports: Vec::new(),
        })
    }

    /// Get a watcher with its transports
    pub fn get_watcher(&self, watcher_id: i64) -> Result<Watcher, PersistenceError> {
        let conn = self.lock()?;

        let mut watcher = conn
            .query_row(
                &format!("SELECT {} FROM watchers WHERE id = ?1", WATCHER_COLUMNS),
                params![watcher_id],
                row_to_watcher,
            )
            .optional()?
            .ok_or_else(|| PersistenceError::NotFound(format!("watcher {}", watcher_id)))?;

        watcher.transports = load_transports(&conn, watcher_id)?;
        Ok(watcher)
    }

    /// Active watchers with their transports, in creation order
    pub fn list_active_watchers(&self) -> Result<Vec<Watcher>, PersistenceError> {
        self.query_watchers("WHERE active = 1", params![])
    }

    /// All watchers of a user, active or not
    pub fn list_user_watchers(&self, user_id: &str) -> Result<Vec<Watcher>, PersistenceError> {
        self.query_watchers("WHERE user_id = ?1", params![user_id])
    }

    pub fn list_all_watchers(&self) -> Result<Vec<Watcher>, PersistenceError> {
        self.query_watchers("", params![])
    }

    fn query_watchers(&self, filter: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Watcher>, PersistenceError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!("SELECT {} FROM watchers {} ORDER BY id", WATCHER_COLUMNS, filter))?;
        let rows = stmt.query_map(params, row_to_watcher)?;

        let mut watchers = Vec::new();
        for row in rows {
            watchers.push(row?);
        }

        for watcher in &mut watchers {
            watcher.transports = load_transports(&conn, watcher.id)?;
        }

        Ok(watchers)
    }

    /// Stop polling a watcher; its history is kept
    pub fn deactivate_watcher(&self, watcher_id: i64) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        let rows_affected = conn.execute("UPDATE watchers SET active = 0 WHERE id = ?1", params![watcher_id])?;
        if rows_affected == 0 {
            return Err(PersistenceError::NotFound(format!("watcher {}", watcher_id)));
        }
        Ok(())
    }

    /// Delete a watcher together with its transports and events
    pub fn delete_watcher(&self, watcher_id: i64) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        let rows_affected = conn.execute("DELETE FROM watchers WHERE id = ?1", params![watcher_id])?;
        if rows_affected == 0 {
            return Err(PersistenceError::NotFound(format!("watcher {}", watcher_id)));
        }
        Ok(())
    }

    pub fn update_threshold(&self, watcher_id: i64, threshold: &str) -> Result<(), AlertError> {
        let conn = self.lock()?;

        let decimals: u8 = conn
            .query_row("SELECT decimals FROM watchers WHERE id = ?1", params![watcher_id], |row| row.get(0))
            .optional()
            .map_err(PersistenceError::from)?
            .ok_or_else(|| PersistenceError::NotFound(format!("watcher {}", watcher_id)))?;
        validate_threshold(threshold, decimals)?;

        conn.execute(
            "UPDATE watchers SET threshold = ?1 WHERE id = ?2",
            params![threshold.trim(), watcher_id],
        )
        .map_err(PersistenceError::from)?;
        Ok(())
    }

    // Transports

    /// Validate a raw transport config against its kind and attach it to a watcher
    pub fn add_transport(&self, watcher_id: i64, kind: TransportKind, raw_config: &Value) -> Result<Transport, AlertError> {
        let config = TransportConfig::parse(kind, raw_config)?;

        let conn = self.lock()?;
        let exists: bool = conn
            .query_row("SELECT EXISTS(SELECT 1 FROM watchers WHERE id = ?1)", params![watcher_id], |row| row.get(0))
            .map_err(PersistenceError::from)?;
        if !exists {
            return Err(PersistenceError::NotFound(format!("watcher {}", watcher_id)).into());
        }

        conn.execute(
            "INSERT INTO transports (watcher_id, kind, config) VALUES (?1, ?2, ?3)",
            params![watcher_id, kind.as_str(), config.to_json().to_string()],
        )
        .map_err(PersistenceError::from)?;

        Ok(Transport {
            id: conn.last_insert_rowid(),
            watcher_id,
            config,
        })
    }

    pub fn list_transports(&self, watcher_id: i64) -> Result<Vec<Transport>, PersistenceError> {
        let conn = self.lock()?;
        load_transports(&conn, watcher_id)
    }

    // Events

    /// Persist a qualifying transfer exactly once per (watcher, transaction).
    ///
    /// An existing row, or a unique-constraint conflict with a concurrent
    /// writer, is reported as [`EventInsert::Duplicate`].
    pub fn create_event(&self, event: &NewTransferEvent) -> Result<EventInsert, PersistenceError> {
        let conn = self.lock()?;
        let tx_hash = event.transaction_hash.to_lowercase();

        if let Some(existing) = find_event_in(&conn, event.watcher_id, &tx_hash)? {
            return Ok(EventInsert::Duplicate(existing));
        }

        insert_event(&conn, event)
    }

    pub fn find_event(&self, watcher_id: i64, transaction_hash: &str) -> Result<Option<TransferEvent>, PersistenceError> {
        let conn = self.lock()?;
        find_event_in(&conn, watcher_id, &transaction_hash.to_lowercase())
    }

    /// Highest block among a watcher's recorded events
    pub fn latest_event_block(&self, watcher_id: i64) -> Result<Option<u64>, PersistenceError> {
        let conn = self.lock()?;
        let block: Option<u64> = conn.query_row(
            "SELECT MAX(block_number) FROM transfer_events WHERE watcher_id = ?1",
            params![watcher_id],
            |row| row.get(0),
        )?;
        Ok(block)
    }

    /// Most recent events of a watcher, newest block first
    pub fn recent_events(&self, watcher_id: i64, limit: usize) -> Result<Vec<TransferEvent>, PersistenceError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfer_events WHERE watcher_id = ?1 ORDER BY block_number DESC, id DESC LIMIT ?2",
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![watcher_id, limit as i64], row_to_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Event count for one watcher, or across all watchers
    pub fn event_count(&self, watcher_id: Option<i64>) -> Result<u64, PersistenceError> {
        let conn = self.lock()?;
        let count: u64 = match watcher_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM transfer_events WHERE watcher_id = ?1",
                params![id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM transfer_events", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}

fn row_to_watcher(row: &Row<'_>) -> rusqlite::Result<Watcher> {
    Ok(Watcher {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        token_address: row.get(3)?,
        threshold: row.get(4)?,
        decimals: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        transports: Vec::new(),
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<TransferEvent> {
    Ok(TransferEvent {
        id: row.get(0)?,
        watcher_id: row.get(1)?,
        token_address: row.get(2)?,
        from_address: row.get(3)?,
        to_address: row.get(4)?,
        amount: row.get(5)?,
        transaction_hash: row.get(6)?,
        block_number: row.get(7)?,
        usd_value: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn load_transports(conn: &Connection, watcher_id: i64) -> Result<Vec<Transport>, PersistenceError> {
    let mut stmt = conn.prepare("SELECT id, kind, config FROM transports WHERE watcher_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![watcher_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;

    let mut transports = Vec::new();
    for row in rows {
        let (id, kind, config) = row?;
        let corrupt = |reason: String| PersistenceError::Integrity(format!("transport {}: {}", id, reason));

        let kind: TransportKind = kind.parse().map_err(|e: crate::error::ConfigurationError| corrupt(e.to_string()))?;
        let raw: Value = serde_json::from_str(&config).map_err(|e| corrupt(e.to_string()))?;
        let config = TransportConfig::parse(kind, &raw).map_err(|e| corrupt(e.to_string()))?;

        transports.push(Transport { id, watcher_id, config });
    }
    Ok(transports)
}

fn find_event_in(conn: &Connection, watcher_id: i64, tx_hash: &str) -> Result<Option<TransferEvent>, PersistenceError> {
    let event = conn
        .query_row(
            &format!(
                "SELECT {} FROM transfer_events WHERE watcher_id = ?1 AND transaction_hash = ?2",
                EVENT_COLUMNS
            ),
            params![watcher_id, tx_hash],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Insert inside a transaction; a unique conflict rolls back and returns the stored row
pub(crate) fn insert_event(conn: &Connection, event: &NewTransferEvent) -> Result<EventInsert, PersistenceError> {
    let tx_hash = event.transaction_hash.to_lowercase();
    let token_address = normalize_address(&event.token_address);
    let created_at = chrono::Utc::now().timestamp();

    let tx = conn.unchecked_transaction()?;
    let inserted = tx.execute(
        "INSERT INTO transfer_events
            (watcher_id, token_address, from_address, to_address, amount, transaction_hash, block_number, usd_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.watcher_id,
            token_address,
            event.from_address,
            event.to_address,
            event.amount,
            tx_hash,
            event.block_number,
            event.usd_value,
            created_at
        ],
    );

    match inserted {
        Ok(_) => {
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(EventInsert::Created(TransferEvent {
                id,
                watcher_id: event.watcher_id,
                token_address,
                from_address: event.from_address.clone(),
                to_address: event.to_address.clone(),
                amount: event.amount.clone(),
                transaction_hash: tx_hash,
                block_number: event.block_number,
                usd_value: event.usd_value,
                created_at,
            }))
        }
        Err(e) if is_unique_violation(&e) => {
            tx.rollback()?;
            LogContext::new("database", "create_event")
                .with_watcher_id(event.watcher_id)
                .with_transaction_hash(&tx_hash)
                .debug("Concurrent insert detected, treating as duplicate");
            find_event_in(conn, event.watcher_id, &tx_hash)?
                .map(EventInsert::Duplicate)
                .ok_or_else(|| {
                    PersistenceError::Integrity(format!(
                        "constraint violation for watcher {} tx {} without a stored event",
                        event.watcher_id, tx_hash
                    ))
                })
        }
        // Dropping the transaction rolls it back
        Err(e) => Err(e.into()),
    }
}
