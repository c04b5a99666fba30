use crate::database::EventStore;
use crate::error::PersistenceError;

/// Works out where each watcher's next scan starts.
///
/// There is no stored cursor: the next block is one past the highest block
/// among the watcher's recorded events, or the configured start block for a
/// watcher that has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursorResolver {
    start_block: u64,
}

impl ScanCursorResolver {
    pub fn new(start_block: u64) -> Self {
        Self { start_block }
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn resolve(&self, store: &dyn EventStore, watcher_id: i64) -> Result<u64, PersistenceError> {
        // Remaining transfers of a partially processed block are not revisited
        Ok(match store.latest_event_block(watcher_id)? {
            Some(last) => last.saturating_add(1),
            None => self.start_block,
        })
    }
}

impl Default for ScanCursorResolver {
    fn default() -> Self {
        Self::new(0)
    }
}
