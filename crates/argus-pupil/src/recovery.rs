//! Disk-backed recovery record.
//!
//! When the NOC client exhausts its retries, the message it was carrying is
//! written here before the process asks to be restarted. Writes go through
//! a temp file and an atomic rename so a crash mid-write can never leave a
//! half-record behind. A corrupt file found at boot is deleted and ignored.

use std::path::{Path, PathBuf};

use argus_core::noc::NocDetails;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PersistenceConfig;

/// Current record format version.
pub const RECOVERY_VERSION: u32 = 1;

/// A persisted escalation that never reached NOC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    /// Record format version.
    pub version: u32,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Correlation ID of the failed dispatch.
    pub correlation_id: String,
    /// Component that produced the record.
    pub source: String,
    /// Why the dispatch failed.
    pub failure_reason: String,
    /// The message that must still reach NOC.
    pub noc_details: NocDetails,
    /// Set once a later boot successfully replayed the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<DateTime<Utc>>,
}

impl RecoveryRecord {
    /// Build a record for a dispatch that just failed.
    #[must_use]
    pub fn new(correlation_id: &str, failure_reason: &str, noc_details: NocDetails) -> Self {
        Self {
            version: RECOVERY_VERSION,
            failed_at: Utc::now(),
            correlation_id: correlation_id.to_string(),
            source: "pupil".to_string(),
            failure_reason: failure_reason.to_string(),
            noc_details,
            recovered_at: None,
        }
    }
}

/// Errors from recovery persistence.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Disk I/O failed.
    #[error("recovery file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialised.
    #[error("recovery record serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Owns the recovery file path.
#[derive(Debug, Clone)]
pub struct RecoveryStore {
    path: PathBuf,
}

impl RecoveryStore {
    /// Create a store for `<storage_path>/<recovery_file_name>`.
    #[must_use]
    pub fn new(config: &PersistenceConfig) -> Self {
        Self {
            path: config.storage_path.join(&config.recovery_file_name),
        }
    }

    /// The recovery file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a record is currently persisted.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist a record atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the write
    /// fails.
    pub fn write(&self, record: &RecoveryRecord) -> Result<(), RecoveryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(record)?;
        let temp = self.path.with_extension("tmp");
        std::fs::write(&temp, payload)?;
        std::fs::rename(&temp, &self.path)?;
        tracing::warn!(
            path = %self.path.display(),
            correlation_id = %record.correlation_id,
            reason = %record.failure_reason,
            "recovery record persisted"
        );
        Ok(())
    }

    /// Read the persisted record, if any. A corrupt file is deleted and
    /// reported as absent.
    #[must_use]
    pub fn read(&self) -> Option<RecoveryRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                tracing::error!(path = %self.path.display(), %error, "cannot read recovery file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "corrupt recovery file, deleting"
                );
                self.delete();
                None
            }
        }
    }

    /// Remove the recovery file.
    pub fn delete(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::error!(path = %self.path.display(), %error, "cannot delete recovery file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> RecoveryStore {
        RecoveryStore::new(&PersistenceConfig {
            storage_path: dir.to_path_buf(),
            recovery_file_name: "recovery.json".to_string(),
        })
    }

    fn details() -> NocDetails {
        NocDetails {
            priority: 1,
            name: "WorkerSilent".to_string(),
            summary: "worker went quiet".to_string(),
            description: String::new(),
            payload: String::new(),
            source: "pupil".to_string(),
            send_to_noc: true,
            suppress_window: None,
        }
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let record = RecoveryRecord::new("pupil-cafe0001", "HTTP 500", details());
        store.write(&record).unwrap();
        assert!(store.exists());

        let read = store.read().unwrap();
        assert_eq!(read.version, RECOVERY_VERSION);
        assert_eq!(read.correlation_id, "pupil-cafe0001");
        assert_eq!(read.failure_reason, "HTTP 500");
        assert_eq!(read.noc_details.name, "WorkerSilent");
        assert!(read.recovered_at.is_none());
    }

    #[test]
    fn test_write_is_atomic_no_temp_residue() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .write(&RecoveryRecord::new("pupil-cafe0002", "HTTP 502", details()))
            .unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["recovery.json".to_string()]);
    }

    #[test]
    fn test_corrupt_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::write(store.path(), "{oops").unwrap();

        assert!(store.read().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.read().is_none());
        store.delete();
    }

    #[test]
    fn test_camel_case_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .write(&RecoveryRecord::new("pupil-cafe0003", "HTTP 500", details()))
            .unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"failedAt\""));
        assert!(raw.contains("\"failureReason\""));
        assert!(raw.contains("\"nocDetails\""));
    }
}
