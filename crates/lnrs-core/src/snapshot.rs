use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{EntityId, EntityType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Delete,
    Update,
    Manual,
    PreRestore,
}

impl OperationType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Update => "update",
            Self::Manual => "manual",
            Self::PreRestore => "pre_restore",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delete" => Some(Self::Delete),
            "update" => Some(Self::Update),
            "manual" => Some(Self::Manual),
            "pre_restore" | "pre-restore" => Some(Self::PreRestore),
            _ => None,
        }
    }
}

impl Display for OperationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the snapshot metadata log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    /// Compact `YYYYMMDD_HHMMSS_micros` form, also the leading part of the id.
    pub timestamp: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub description: String,
    pub operation_type: OperationType,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<EntityId>,
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub operation_type: Option<OperationType>,
    pub entity_type: Option<EntityType>,
    pub limit: Option<usize>,
}

impl SnapshotFilter {
    #[must_use]
    pub fn matches(&self, metadata: &SnapshotMetadata) -> bool {
        self.operation_type.map_or(true, |op| metadata.operation_type == op)
            && self.entity_type.map_or(true, |et| metadata.entity_type == Some(et))
    }
}

#[must_use]
pub fn compact_timestamp(value: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}_{:06}",
        value.year(),
        u8::from(value.month()),
        value.day(),
        value.hour(),
        value.minute(),
        value.second(),
        value.microsecond()
    )
}

/// Deterministic artifact stem: timestamp, then operation and entity reference when present.
#[must_use]
pub fn snapshot_stem(
    timestamp: &str,
    operation_type: OperationType,
    entity_type: Option<EntityType>,
    entity_id: Option<&EntityId>,
) -> String {
    let mut parts = vec![timestamp.to_string(), operation_type.as_str().to_string()];
    if let Some(entity_type) = entity_type {
        parts.push(entity_type.as_str().to_string());
    }
    if let Some(entity_id) = entity_id {
        parts.push(sanitize_component(&entity_id.to_string()));
    }
    parts.join("_")
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '-' })
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "-".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn compact_timestamp_is_zero_padded_and_sortable() {
        let early = compact_timestamp(datetime!(2025-01-02 03:04:05.000_006 UTC));
        let late = compact_timestamp(datetime!(2025-11-02 03:04:05 UTC));
        assert_eq!(early, "20250102_030405_000006");
        assert!(early < late);
    }

    #[test]
    fn stem_includes_operation_and_entity_reference() {
        let stem = snapshot_stem(
            "20250102_030405_000006",
            OperationType::Delete,
            Some(EntityType::Grant),
            Some(&EntityId::Text("CS/AM 1".to_string())),
        );
        assert_eq!(stem, "20250102_030405_000006_delete_grant_CS-AM-1");

        let manual = snapshot_stem("20250102_030405_000006", OperationType::Manual, None, None);
        assert_eq!(manual, "20250102_030405_000006_manual");
    }

    #[test]
    fn filter_matches_operation_and_entity() {
        let metadata = SnapshotMetadata {
            snapshot_id: "s".to_string(),
            timestamp: "t".to_string(),
            created_at: datetime!(2025-01-02 03:04:05 UTC),
            description: String::new(),
            operation_type: OperationType::Delete,
            entity_type: Some(EntityType::Measure),
            entity_id: Some(EntityId::Int(4)),
            file_name: "s.sqlite3".to_string(),
            size_bytes: 0,
            sha256: String::new(),
        };
        assert!(SnapshotFilter::default().matches(&metadata));
        assert!(SnapshotFilter {
            operation_type: Some(OperationType::Delete),
            entity_type: Some(EntityType::Measure),
            limit: None,
        }
        .matches(&metadata));
        assert!(!SnapshotFilter { entity_type: Some(EntityType::Area), ..SnapshotFilter::default() }
            .matches(&metadata));
    }

    proptest! {
        #[test]
        fn stem_never_contains_path_separators(raw in ".{1,80}") {
            let stem = snapshot_stem(
                "20250102_030405_000006",
                OperationType::Delete,
                Some(EntityType::Grant),
                Some(&EntityId::Text(raw)),
            );
            prop_assert!(!stem.contains('/'));
            prop_assert!(!stem.contains('\\'));
            prop_assert!(!stem.contains(".."));
        }
    }
}
