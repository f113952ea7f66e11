//! Append-only JSON lines file store

use async_trait::async_trait;
use sentinel_core::PersistRecord;
use sentinel_ports::{PersistenceError, PersistenceStore};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Appends each record as one JSON object per line.
///
/// A batch is serialised in full before anything is written, so a
/// serialisation failure leaves the file untouched.
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back (used by restore on startup)
    pub async fn read_all(&self) -> Result<Vec<PersistRecord>, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::Unavailable(e.to_string())),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| PersistenceError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl PersistenceStore for JsonLinesStore {
    async fn write_batch(&self, records: &[PersistRecord]) -> Result<(), PersistenceError> {
        let mut buf = Vec::with_capacity(records.len() * 256);
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
            buf.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        file.write_all(&buf)
            .await
            .map_err(|e| PersistenceError::Write(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PersistenceError::Write(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "JsonLinesStore"
    }
}
