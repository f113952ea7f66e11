//! Global kill switch
//!
//! The hot-path check is a single atomic load. Engagement details sit behind
//! a `parking_lot::Mutex` since they are only written on exceptional events.
//!
//! With a `file_path` configured the switch is mirrored to a sentinel file
//! so that other processes sharing the path observe it within one poll
//! interval: a local engagement writes the file, a local release removes it,
//! and a file that appears from elsewhere engages this process too.

use parking_lot::Mutex;
use sentinel_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchConfig {
    /// Sentinel file shared between processes (disabled when `None`)
    pub file_path: Option<PathBuf>,
    /// How often the sentinel file is synchronised (ms)
    pub poll_interval_ms: u64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            poll_interval_ms: 500,
        }
    }
}

/// Who engaged the switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillReasonKind {
    /// Operator
    Manual,
    /// Aggregate account drawdown limit (cleared by the daily reset)
    PortfolioDrawdown,
    /// Another process, via the sentinel file
    External,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchStatus {
    pub engaged: bool,
    pub kind: Option<KillReasonKind>,
    pub reason: Option<String>,
    pub engaged_at: Option<Timestamp>,
}

/// What a file synchronisation pass did
#[derive(Debug, Clone, PartialEq)]
pub enum FileSync {
    /// Local engagement written to the sentinel file
    Published,
    /// Local release removed the sentinel file
    Cleared,
    /// The file appeared from elsewhere and engaged this process
    EngagedExternally { reason: String },
    /// An externally engaged switch was released elsewhere
    ReleasedExternally,
}

pub struct KillSwitch {
    engaged: AtomicBool,
    detail: Mutex<KillSwitchStatus>,
    /// Set by a local release until the sentinel file has been removed
    pending_clear: AtomicBool,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            engaged: AtomicBool::new(false),
            detail: Mutex::new(KillSwitchStatus::default()),
            pending_clear: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Engage the switch. Returns `true` if it was not engaged before.
    ///
    /// A manual engagement replaces an automatic one so that the daily reset
    /// does not release it.
    pub fn engage(&self, kind: KillReasonKind, reason: &str, now: Timestamp) -> bool {
        let mut detail = self.detail.lock();
        let newly = !detail.engaged;
        if newly || kind == KillReasonKind::Manual {
            *detail = KillSwitchStatus {
                engaged: true,
                kind: Some(kind),
                reason: Some(reason.to_string()),
                engaged_at: Some(now),
            };
        }
        self.pending_clear.store(false, Ordering::Release);
        self.engaged.store(true, Ordering::Release);
        newly
    }

    /// Release the switch. Returns `true` if it was engaged.
    pub fn release(&self) -> bool {
        let mut detail = self.detail.lock();
        let was = detail.engaged;
        *detail = KillSwitchStatus::default();
        self.engaged.store(false, Ordering::Release);
        if was {
            self.pending_clear.store(true, Ordering::Release);
        }
        was
    }

    /// Release only if the switch is engaged for `kind`
    pub fn release_if(&self, kind: KillReasonKind) -> bool {
        let matches = self.detail.lock().kind == Some(kind);
        matches && self.release()
    }

    pub fn status(&self) -> KillSwitchStatus {
        self.detail.lock().clone()
    }

    /// One synchronisation pass against the sentinel file
    pub async fn sync_with_file(
        &self,
        path: &Path,
        now: Timestamp,
    ) -> std::io::Result<Option<FileSync>> {
        let file_exists = tokio::fs::try_exists(path).await?;

        if self.pending_clear.swap(false, Ordering::AcqRel) {
            if file_exists {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        self.pending_clear.store(true, Ordering::Release);
                        return Err(e);
                    }
                }
                return Ok(Some(FileSync::Cleared));
            }
            return Ok(None);
        }

        let status = self.status();
        match (status.engaged, file_exists) {
            (true, false) if status.kind == Some(KillReasonKind::External) => {
                self.release();
                // Nothing to remove, the other process already did
                self.pending_clear.store(false, Ordering::Release);
                Ok(Some(FileSync::ReleasedExternally))
            }
            (true, false) => {
                let body = serde_json::to_vec_pretty(&status)?;
                tokio::fs::write(path, body).await?;
                Ok(Some(FileSync::Published))
            }
            (false, true) => {
                let reason = match tokio::fs::read(path).await {
                    Ok(bytes) => serde_json::from_slice::<KillSwitchStatus>(&bytes)
                        .ok()
                        .and_then(|s| s.reason)
                        .unwrap_or_else(|| "sentinel file present".to_string()),
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e),
                };
                let reason = format!("external: {}", reason);
                self.engage(KillReasonKind::External, &reason, now);
                Ok(Some(FileSync::EngagedExternally { reason }))
            }
            _ => Ok(None),
        }
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}
