//! JSON run ledger, rewritten wholesale on each mutation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::domain::RunRecord;
use crate::error::{CaprunError, Result};

/// Ordered set of run records keyed by id, persisted as a pretty JSON array.
///
/// Every read-modify-write holds `lock`, so mutations from concurrent tasks in
/// this process never interleave. Other processes writing the same file are
/// last-writer-wins.
#[derive(Debug)]
pub struct RunLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

/// Result of loading the ledger file
struct Loaded {
    records: Vec<RunRecord>,
    corrupt: bool,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in ledger order.
    ///
    /// A missing ledger is materialized as `[]`. Any other failure is logged
    /// and yields an empty list.
    pub async fn read_all(&self) -> Vec<RunRecord> {
        let _guard = self.lock.lock().await;
        self.load().await.records
    }

    /// Look up one record by id
    pub async fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.read_all().await.into_iter().find(|r| r.id == run_id)
    }

    /// Replace the whole ledger
    pub async fn write_all(&self, records: &[RunRecord]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store(records).await
    }

    /// Replace the record with a matching id, else append.
    ///
    /// Returns `Ok(false)` without writing when the update would move a
    /// terminal record back to `running`.
    pub async fn upsert(&self, record: RunRecord) -> Result<bool> {
        self.mutate(move |records| match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) if existing.status.is_terminal() && !record.status.is_terminal() => {
                log::warn!(
                    "Refusing to move run {} from {} back to {}",
                    existing.id,
                    existing.status,
                    record.status
                );
                false
            }
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                records.push(record);
                true
            }
        })
        .await
    }

    /// Apply `f` under the ledger lock and persist if it reports a change.
    pub async fn mutate<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<RunRecord>) -> bool,
    {
        let _guard = self.lock.lock().await;
        let Loaded { mut records, corrupt } = self.load().await;
        if !f(&mut records) {
            return Ok(false);
        }
        if corrupt {
            self.set_aside().await;
        }
        self.store(&records).await?;
        Ok(true)
    }

    async fn load(&self) -> Loaded {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Err(e) = self.store(&[]).await {
                    log::warn!("Failed to create run ledger {}: {}", self.path.display(), e);
                }
                return Loaded {
                    records: Vec::new(),
                    corrupt: false,
                };
            }
            Err(e) => {
                log::warn!("Failed to read run ledger {}: {}", self.path.display(), e);
                return Loaded {
                    records: Vec::new(),
                    corrupt: false,
                };
            }
        };

        if content.trim().is_empty() {
            return Loaded {
                records: Vec::new(),
                corrupt: false,
            };
        }

        match serde_json::from_str(&content) {
            Ok(records) => Loaded { records, corrupt: false },
            Err(e) => {
                log::warn!("Run ledger {} is not valid JSON: {}", self.path.display(), e);
                Loaded {
                    records: Vec::new(),
                    corrupt: true,
                }
            }
        }
    }

    async fn store(&self, records: &[RunRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut body = serde_json::to_string_pretty(records)?;
        body.push('\n');

        let tmp = self.sibling("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CaprunError::Ledger(format!("replace {}: {}", self.path.display(), e)))
    }

    /// Keep an unreadable ledger around before it is overwritten
    async fn set_aside(&self) {
        let backup = self.sibling("corrupt");
        match tokio::fs::rename(&self.path, &backup).await {
            Ok(()) => log::warn!("Moved unreadable run ledger to {}", backup.display()),
            Err(e) => log::warn!("Failed to move unreadable run ledger aside: {}", e),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}
