pub mod operations;
pub mod schema;


pub use operations::Database;
pub use schema::initialize_schema;

use crate::error::PersistenceError;
use crate::models::{EventInsert, NewTransferEvent, Watcher};

/// The persistence operations the poll loop depends on
pub trait EventStore: Send + Sync {
    fn active_watchers(&self) -> Result<Vec<Watcher>, PersistenceError>;

    fn latest_event_block(&self, watcher_id: i64) -> Result<Option<u64>, PersistenceError>;

    fn create_event(&self, event: &NewTransferEvent) -> Result<EventInsert, PersistenceError>;
}

impl EventStore for Database {
    fn active_watchers(&self) -> Result<Vec<Watcher>, PersistenceError> {
        self.list_active_watchers()
    }

    fn latest_event_block(&self, watcher_id: i64) -> Result<Option<u64>, PersistenceError> {
        Database::latest_event_block(self, watcher_id)
    }

    fn create_event(&self, event: &NewTransferEvent) -> Result<EventInsert, PersistenceError> {
        Database::create_event(self, event)
    }
}
