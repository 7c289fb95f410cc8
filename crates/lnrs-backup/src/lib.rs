//! Snapshot manager for the LNRS registry store.
//!
//! A snapshot is a byte-for-byte copy of the store file plus one record in
//! `snapshot_metadata.json`. When backups are disabled every informational operation is a
//! neutral no-op, while restore and delete fail with [`BackupError::Disabled`].
//!
//! The manager never holds a store connection. Callers drop their [`SqliteStore`] before
//! [`BackupManager::restore_snapshot`] and reopen it afterwards.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lnrs_core::snapshot::{compact_timestamp, snapshot_stem};
use lnrs_core::{EntityId, EntityType, OperationType, SnapshotFilter, SnapshotMetadata};
use lnrs_store_sqlite::timing::OperationTimer;
use lnrs_store_sqlite::{IntegrityReport, SqliteStore};
use serde::Serialize;
use time::OffsetDateTime;

mod detect;
mod error;
mod metadata;

pub use detect::{detect_backup_mode, BackupMode, DetectionReason, BACKUPS_ENV};
pub use error::{BackupError, Result};
pub use metadata::METADATA_FILE;

use metadata::{sha256_file, MetadataLog};

pub const DEFAULT_RETENTION: usize = 10;
pub const ARTIFACT_EXTENSION: &str = "sqlite3";

const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub enabled: bool,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    pub retention: usize,
}

impl BackupConfig {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            retention: DEFAULT_RETENTION,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: BackupMode) -> Self {
        self.enabled = mode.is_enabled();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub safety_snapshot_id: String,
    pub measure_count: i64,
    pub integrity: IntegrityReport,
}

#[derive(Debug)]
pub struct BackupManager {
    config: BackupConfig,
    log: MetadataLog,
}

impl BackupManager {
    /// Build a manager for `config`. Nothing is touched on disk until a snapshot is taken.
    #[must_use]
    pub fn new(config: BackupConfig) -> Self {
        if config.enabled {
            tracing::info!(backup_dir = %config.backup_dir.display(), "snapshots enabled");
        } else {
            tracing::info!("snapshots disabled for this environment");
        }
        let log = MetadataLog::new(&config.backup_dir);
        Self { config, log }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Copy the store file to a new artifact and record it. Returns `None` when disabled.
    ///
    /// # Errors
    /// Returns an error when the store file is missing, the copy fails, or the metadata log
    /// cannot be read or written. A failed log write removes the new artifact again.
    pub fn create_snapshot(
        &self,
        description: &str,
        operation_type: OperationType,
        entity_type: Option<EntityType>,
        entity_id: Option<&EntityId>,
    ) -> Result<Option<String>> {
        if !self.config.enabled {
            tracing::info!(operation_type = operation_type.as_str(), "snapshot skipped, backups disabled");
            return Ok(None);
        }
        if !self.config.db_path.exists() {
            return Err(BackupError::DatabaseMissing(self.config.db_path.clone()));
        }
        fs::create_dir_all(&self.config.backup_dir)
            .map_err(|err| BackupError::io(&self.config.backup_dir, err))?;

        let mut records = self.log.load()?;
        let created_at = OffsetDateTime::now_utc();
        let timestamp = compact_timestamp(created_at);
        let stem = snapshot_stem(&timestamp, operation_type, entity_type, entity_id);
        let snapshot_id = self.unique_snapshot_id(&stem, &records);
        let file_name = format!("{snapshot_id}.{ARTIFACT_EXTENSION}");
        let artifact = self.config.backup_dir.join(&file_name);

        let size_bytes = fs::copy(&self.config.db_path, &artifact)
            .map_err(|err| BackupError::io(&artifact, err))?;
        let sha256 = match sha256_file(&artifact) {
            Ok(digest) => digest,
            Err(err) => {
                discard_artifact(&artifact);
                return Err(err);
            }
        };

        records.push(SnapshotMetadata {
            snapshot_id: snapshot_id.clone(),
            timestamp,
            created_at,
            description: description.to_string(),
            operation_type,
            entity_type,
            entity_id: entity_id.cloned(),
            file_name,
            size_bytes,
            sha256,
        });
        if let Err(err) = self.log.save(&records) {
            discard_artifact(&artifact);
            return Err(err);
        }

        tracing::info!(snapshot_id = %snapshot_id, size_bytes, "created snapshot");
        Ok(Some(snapshot_id))
    }

    /// Best-effort snapshot before a destructive operation.
    ///
    /// Failures are logged and swallowed so the operation itself can go ahead.
    pub fn try_snapshot(
        &self,
        description: &str,
        operation_type: OperationType,
        entity_type: Option<EntityType>,
        entity_id: Option<&EntityId>,
    ) -> Option<String> {
        match self.create_snapshot(description, operation_type, entity_type, entity_id) {
            Ok(snapshot_id) => snapshot_id,
            Err(err) => {
                tracing::warn!(
                    operation_type = operation_type.as_str(),
                    "pre-operation snapshot failed, continuing without one: {err}"
                );
                None
            }
        }
    }

    /// Snapshot records, newest first, narrowed by `filter`.
    ///
    /// # Errors
    /// Returns [`BackupError::Metadata`] when the log exists but cannot be parsed.
    pub fn list_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotMetadata>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let mut records: Vec<_> =
            newest_first(self.log.load()?).into_iter().filter(|r| filter.matches(r)).collect();
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Replace the live store with a snapshot.
    ///
    /// The snapshot is located and its checksum verified first. Then a `pre_restore` snapshot
    /// of the current store is taken, the artifact copied over the store file, and the result
    /// reopened and checked. A failed check is not reverted; the error names the safety
    /// snapshot to restore instead.
    ///
    /// # Errors
    /// Returns [`BackupError::Disabled`] when backups are off, [`BackupError::NotFound`],
    /// [`BackupError::ArtifactMissing`] or [`BackupError::ChecksumMismatch`] before anything
    /// is touched, and [`BackupError::Verification`] when the restored store is unhealthy.
    pub fn restore_snapshot(&self, snapshot_id: &str) -> Result<RestoreReport> {
        if !self.config.enabled {
            tracing::warn!(snapshot_id, "restore refused, backups disabled");
            return Err(BackupError::Disabled { operation: "restore" });
        }
        let timer = OperationTimer::start("restore_snapshot");
        timer.record(self.run_restore(snapshot_id))
    }

    fn run_restore(&self, snapshot_id: &str) -> Result<RestoreReport> {
        let record = self
            .log
            .load()?
            .into_iter()
            .find(|r| r.snapshot_id == snapshot_id)
            .ok_or_else(|| BackupError::NotFound(snapshot_id.to_string()))?;

        let artifact = self.config.backup_dir.join(&record.file_name);
        if !artifact.is_file() {
            return Err(BackupError::ArtifactMissing { snapshot_id: snapshot_id.to_string(), path: artifact });
        }
        let actual = sha256_file(&artifact)?;
        if actual != record.sha256 {
            return Err(BackupError::ChecksumMismatch {
                snapshot_id: snapshot_id.to_string(),
                expected: record.sha256,
                actual,
            });
        }

        let safety_snapshot_id = self
            .create_snapshot(
                &format!("Pre-restore safety backup (restoring {snapshot_id})"),
                OperationType::PreRestore,
                None,
                None,
            )?
            .ok_or(BackupError::Disabled { operation: "restore" })?;
        tracing::info!(snapshot_id, safety_snapshot_id = %safety_snapshot_id, "safety snapshot taken");

        for suffix in SIDECAR_SUFFIXES {
            let sidecar = sidecar_path(&self.config.db_path, suffix);
            match fs::remove_file(&sidecar) {
                Ok(()) => tracing::debug!(path = %sidecar.display(), "removed sidecar file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(BackupError::io(sidecar, err)),
            }
        }
        fs::copy(&artifact, &self.config.db_path)
            .map_err(|err| BackupError::io(&self.config.db_path, err))?;

        let verification_failed = |reason: String| BackupError::Verification {
            snapshot_id: snapshot_id.to_string(),
            safety_snapshot_id: safety_snapshot_id.clone(),
            reason,
        };
        let store = SqliteStore::open(&self.config.db_path)
            .map_err(|err| verification_failed(err.to_string()))?;
        let integrity = store.integrity_check().map_err(|err| verification_failed(err.to_string()))?;
        if !integrity.is_healthy() {
            return Err(verification_failed(describe_unhealthy(&integrity)));
        }
        let measure_count = store
            .count_entities(EntityType::Measure)
            .map_err(|err| verification_failed(err.to_string()))?;

        tracing::info!(snapshot_id, measure_count, "restored snapshot");
        Ok(RestoreReport {
            snapshot_id: snapshot_id.to_string(),
            safety_snapshot_id,
            measure_count,
            integrity,
        })
    }

    /// Keep the `keep` newest snapshots and delete the rest. Returns how many were removed.
    ///
    /// An artifact that cannot be deleted keeps its record so a later pass can retry it.
    ///
    /// # Errors
    /// Returns an error when the metadata log cannot be read or rewritten.
    pub fn cleanup_old_snapshots(&self, keep: usize) -> Result<usize> {
        if !self.config.enabled {
            return Ok(0);
        }
        let records = self.log.load()?;
        if records.len() <= keep {
            tracing::debug!(count = records.len(), keep, "snapshot cleanup not needed");
            return Ok(0);
        }

        let mut removed = BTreeSet::new();
        for record in newest_first(records.clone()).into_iter().skip(keep) {
            match self.remove_artifact(&record) {
                Ok(()) => {
                    removed.insert(record.snapshot_id);
                }
                Err(err) => {
                    tracing::warn!(snapshot_id = %record.snapshot_id, "failed to delete old snapshot: {err}");
                }
            }
        }

        let kept: Vec<_> =
            records.into_iter().filter(|r| !removed.contains(&r.snapshot_id)).collect();
        self.log.save(&kept)?;
        tracing::info!(removed = removed.len(), keep, "cleaned up old snapshots");
        Ok(removed.len())
    }

    /// Delete one snapshot artifact and its record.
    ///
    /// # Errors
    /// Returns [`BackupError::Disabled`] when backups are off, [`BackupError::NotFound`] for an
    /// unknown id, or an I/O error when the artifact cannot be removed.
    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<SnapshotMetadata> {
        if !self.config.enabled {
            return Err(BackupError::Disabled { operation: "delete" });
        }
        let mut records = self.log.load()?;
        let position = records
            .iter()
            .position(|r| r.snapshot_id == snapshot_id)
            .ok_or_else(|| BackupError::NotFound(snapshot_id.to_string()))?;

        self.remove_artifact(&records[position])?;
        let record = records.remove(position);
        self.log.save(&records)?;
        tracing::info!(snapshot_id, "deleted snapshot");
        Ok(record)
    }

    fn remove_artifact(&self, record: &SnapshotMetadata) -> Result<()> {
        let path = self.config.backup_dir.join(&record.file_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(snapshot_id = %record.snapshot_id, "snapshot artifact already gone");
                Ok(())
            }
            Err(err) => Err(BackupError::io(path, err)),
        }
    }

    fn unique_snapshot_id(&self, stem: &str, records: &[SnapshotMetadata]) -> String {
        let taken = |candidate: &str| {
            records.iter().any(|r| r.snapshot_id == candidate)
                || self
                    .config
                    .backup_dir
                    .join(format!("{candidate}.{ARTIFACT_EXTENSION}"))
                    .exists()
        };
        if !taken(stem) {
            return stem.to_string();
        }
        (2_u32..)
            .map(|n| format!("{stem}-{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| format!("{stem}-{}", u32::MAX))
    }
}

/// Newest first by creation time; records created at the same instant keep log order reversed.
fn newest_first(records: Vec<SnapshotMetadata>) -> Vec<SnapshotMetadata> {
    let mut indexed: Vec<_> = records.into_iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
    indexed.into_iter().map(|(_, record)| record).collect()
}

/// Remove an artifact whose snapshot could not be recorded.
fn discard_artifact(artifact: &Path) {
    if let Err(err) = fs::remove_file(artifact) {
        tracing::warn!(path = %artifact.display(), "failed to remove unrecorded snapshot artifact: {err}");
    }
}

fn sidecar_path(db_path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(db_path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

fn describe_unhealthy(report: &IntegrityReport) -> String {
    let mut problems = Vec::new();
    if !report.quick_check_ok {
        problems.push(format!("quick_check: {}", report.quick_check_message));
    }
    if !report.foreign_key_violations.is_empty() {
        problems.push(format!("{} foreign key violations", report.foreign_key_violations.len()));
    }
    if !report.schema_status.pending_versions.is_empty() {
        problems.push(format!(
            "schema at version {} of {}",
            report.schema_status.current_version, report.schema_status.target_version
        ));
    }
    problems.join("; ")
}
