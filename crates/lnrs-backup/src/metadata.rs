use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use lnrs_core::SnapshotMetadata;
use sha2::{Digest, Sha256};

use crate::{BackupError, Result};

pub const METADATA_FILE: &str = "snapshot_metadata.json";

/// Append-ordered JSON array of snapshot records kept next to the artifacts.
#[derive(Debug, Clone)]
pub(crate) struct MetadataLog {
    path: PathBuf,
}

impl MetadataLog {
    pub(crate) fn new(backup_dir: &Path) -> Self {
        Self { path: backup_dir.join(METADATA_FILE) }
    }

    /// Records in creation order. A missing log reads as empty.
    pub(crate) fn load(&self) -> Result<Vec<SnapshotMetadata>> {
        let body = match fs::read_to_string(&self.path) {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BackupError::io(&self.path, err)),
        };
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body)
            .map_err(|source| BackupError::Metadata { path: self.path.clone(), source })
    }

    /// Replace the log. Written to a sibling file first so a crash never leaves half a log.
    pub(crate) fn save(&self, records: &[SnapshotMetadata]) -> Result<()> {
        let body = serde_json::to_string_pretty(records)
            .map_err(|source| BackupError::Metadata { path: self.path.clone(), source })?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, body).map_err(|err| BackupError::io(&staging, err))?;
        fs::rename(&staging, &self.path).map_err(|err| BackupError::io(&self.path, err))
    }
}

pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|err| BackupError::io(path, err))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|err| BackupError::io(path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use lnrs_core::OperationType;
    use time::OffsetDateTime;

    use super::*;

    fn record(id: &str) -> SnapshotMetadata {
        SnapshotMetadata {
            snapshot_id: id.to_string(),
            timestamp: id.to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            description: "test".to_string(),
            operation_type: OperationType::Manual,
            entity_type: None,
            entity_id: None,
            file_name: format!("{id}.sqlite3"),
            size_bytes: 0,
            sha256: String::new(),
        }
    }

    #[test]
    fn missing_log_reads_empty_and_save_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let log = MetadataLog::new(dir.path());
        assert!(log.load()?.is_empty());

        log.save(&[record("a"), record("b")])?;
        let ids: Vec<_> = log.load()?.into_iter().map(|r| r.snapshot_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!dir.path().join("snapshot_metadata.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn corrupt_log_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(METADATA_FILE), "{not json")?;
        let log = MetadataLog::new(dir.path());
        assert!(matches!(log.load(), Err(BackupError::Metadata { .. })));
        Ok(())
    }

    #[test]
    fn sha256_matches_known_digest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("abc");
        fs::write(&path, b"abc")?;
        assert_eq!(
            sha256_file(&path)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        Ok(())
    }
}
