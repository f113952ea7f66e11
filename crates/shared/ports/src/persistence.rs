use async_trait::async_trait;
use sentinel_core::PersistRecord;

use crate::error::PersistenceError;

/// Durable storage for event logs and checkpoints.
///
/// Only ever called from the background drain worker, never from the
/// decision path, so implementations are free to perform I/O.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Write a batch of records; either all are accepted or the call fails
    async fn write_batch(&self, records: &[PersistRecord]) -> Result<(), PersistenceError>;

    fn name(&self) -> &str {
        "PersistenceStore"
    }
}
