// SPDX-License-Identifier: AGPL-3.0
// Siro Transfer Core - Transfer history persistence
//
// Stores one record per finished transfer in a local JSON file.

use crate::types::{AppError, TransferDirection, TransferPhase, TransferStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default number of history entries to keep
pub const MAX_HISTORY_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferOutcome {
    Completed,
    Failed,
}

/// One finished transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub direction: TransferDirection,
    /// File name(s) if known, otherwise the code phrase
    pub summary: String,
    pub outcome: TransferOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HistoryRecord {
    /// Record for a terminal status. `fallback_summary` is used when croc
    /// never named the file.
    pub fn from_status(
        direction: TransferDirection,
        status: &TransferStatus,
        fallback_summary: &str,
    ) -> Self {
        let outcome = match status.status {
            TransferPhase::Completed => TransferOutcome::Completed,
            _ => TransferOutcome::Failed,
        };
        let summary = status
            .file
            .clone()
            .unwrap_or_else(|| fallback_summary.to_string());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            direction,
            summary,
            outcome,
            message: match outcome {
                TransferOutcome::Failed => status.message.clone(),
                TransferOutcome::Completed => None,
            },
        }
    }
}

/// Append-only destination for finished transfers
pub trait HistorySink: Send + Sync {
    fn record(&self, record: HistoryRecord) -> Result<(), AppError>;
}

/// File-based transfer history storage
pub struct TransferHistory {
    records: RwLock<Vec<HistoryRecord>>,
    file_path: PathBuf,
    max_entries: usize,
}

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    records: Vec<HistoryRecord>,
}

impl TransferHistory {
    /// Create a new history store in the platform config dir
    pub fn new(max_entries: usize) -> Result<Self, AppError> {
        let file_path = Self::get_history_path()?;
        Self::open(file_path, max_entries)
    }

    /// Open (or start) a history file at an explicit location
    pub fn open(file_path: impl Into<PathBuf>, max_entries: usize) -> Result<Self, AppError> {
        let file_path = file_path.into();

        let records = if file_path.exists() {
            let content = fs::read_to_string(&file_path)
                .map_err(|e| AppError::FileIo(format!("Failed to read history: {}", e)))?;

            let file: HistoryFile = serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse history, starting fresh: {}", e);
                HistoryFile {
                    records: Vec::new(),
                }
            });

            file.records
        } else {
            Vec::new()
        };

        Ok(Self {
            records: RwLock::new(records),
            file_path,
            max_entries: max_entries.max(1),
        })
    }

    /// Get the path to the history file
    fn get_history_path() -> Result<PathBuf, AppError> {
        let config_dir = directories::ProjectDirs::from("com", "siro", "transfer")
            .ok_or_else(|| AppError::FileIo("Could not determine config directory".to_string()))?
            .config_dir()
            .to_path_buf();

        fs::create_dir_all(&config_dir)
            .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;

        Ok(config_dir.join("history.json"))
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<HistoryRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<HistoryRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist history to disk
    fn persist(&self) -> Result<(), AppError> {
        let file = HistoryFile {
            records: self.read().clone(),
        };

        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| AppError::Serialization(format!("Failed to serialize history: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.file_path, content)
            .map_err(|e| AppError::FileIo(format!("Failed to write history: {}", e)))?;

        Ok(())
    }

    /// All records, most recent first
    pub fn list(&self) -> Vec<HistoryRecord> {
        self.read().clone()
    }

    pub fn add(&self, record: HistoryRecord) -> Result<(), AppError> {
        {
            let mut records = self.write();
            records.insert(0, record);
            records.truncate(self.max_entries);
        }

        self.persist()
    }

    /// Remove one record; false if the id is unknown
    pub fn remove(&self, id: &str) -> Result<bool, AppError> {
        let removed = {
            let mut records = self.write();
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        };

        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), AppError> {
        self.write().clear();
        self.persist()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }
}

impl HistorySink for TransferHistory {
    fn record(&self, record: HistoryRecord) -> Result<(), AppError> {
        self.add(record)
    }
}
