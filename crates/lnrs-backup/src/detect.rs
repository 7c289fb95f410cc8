//! Backup-mode detection for the process entry point.
//!
//! Snapshot files only make sense where the working directory survives restarts. Hosted
//! deployments that rebuild the container on every start are recognised from their
//! environment and get backups switched off.

use std::path::Path;

use serde::Serialize;

pub const BACKUPS_ENV: &str = "LNRS_BACKUPS";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupMode {
    Enabled,
    Disabled,
}

impl BackupMode {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }
}

/// Why [`detect_backup_mode`] chose its mode.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionReason {
    ExplicitOverride,
    SharingMode,
    HeadlessServer,
    HostedWorkingDirectory,
    LocalDefault,
}

/// Decide whether snapshots can be kept, from environment lookups and the working directory.
///
/// `LNRS_BACKUPS=on|off` wins over everything else. Unrecognised values fall through to the
/// hosting heuristics.
pub fn detect_backup_mode<F>(env: F, cwd: &Path) -> (BackupMode, DetectionReason)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = env(BACKUPS_ENV) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" | "enabled" => {
                return (BackupMode::Enabled, DetectionReason::ExplicitOverride);
            }
            "off" | "0" | "false" | "disabled" => {
                return (BackupMode::Disabled, DetectionReason::ExplicitOverride);
            }
            _ => {}
        }
    }

    if env("STREAMLIT_SHARING_MODE").is_some() {
        return (BackupMode::Disabled, DetectionReason::SharingMode);
    }
    if env("STREAMLIT_SERVER_HEADLESS").as_deref() == Some("true") {
        return (BackupMode::Disabled, DetectionReason::HeadlessServer);
    }
    if cwd.to_string_lossy().contains("/mount/src/") {
        return (BackupMode::Disabled, DetectionReason::HostedWorkingDirectory);
    }
    (BackupMode::Enabled, DetectionReason::LocalDefault)
}
