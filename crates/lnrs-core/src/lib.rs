use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub mod graph;
pub mod snapshot;

pub use graph::{bridge, bridges_of, dependents_of, Bridge, Dependent};
pub use snapshot::{OperationType, SnapshotFilter, SnapshotMetadata};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Core entity tables that can only be destroyed through the cascade engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Measure,
    Area,
    Priority,
    Species,
    Grant,
    Habitat,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IdKind {
    Integer,
    Text,
}

impl EntityType {
    pub const ALL: [Self; 6] = [
        Self::Measure,
        Self::Area,
        Self::Priority,
        Self::Species,
        Self::Grant,
        Self::Habitat,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Measure => "measure",
            Self::Area => "area",
            Self::Priority => "priority",
            Self::Species => "species",
            Self::Grant => "grant",
            Self::Habitat => "habitat",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "measure" => Some(Self::Measure),
            "area" => Some(Self::Area),
            "priority" => Some(Self::Priority),
            "species" => Some(Self::Species),
            "grant" => Some(Self::Grant),
            "habitat" => Some(Self::Habitat),
            _ => None,
        }
    }

    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Measure => "measure",
            Self::Area => "area",
            Self::Priority => "priority",
            Self::Species => "species",
            Self::Grant => "grant_table",
            Self::Habitat => "habitat",
        }
    }

    #[must_use]
    pub fn id_column(self) -> &'static str {
        match self {
            Self::Measure => "measure_id",
            Self::Area => "area_id",
            Self::Priority => "priority_id",
            Self::Species => "species_id",
            Self::Grant => "grant_id",
            Self::Habitat => "habitat_id",
        }
    }

    #[must_use]
    pub fn id_kind(self) -> IdKind {
        match self {
            Self::Grant => IdKind::Text,
            _ => IdKind::Integer,
        }
    }

    /// Scalar columns a caller may set on create or update.
    #[must_use]
    pub fn scalar_columns(self) -> &'static [&'static str] {
        match self {
            Self::Measure => &[
                "measure",
                "concise_measure",
                "core_supplementary",
                "mapped_unmapped",
                "link_to_further_guidance",
            ],
            Self::Area => &["area_name", "area_description", "area_link"],
            Self::Priority => &["biodiversity_priority", "simplified_biodiversity_priority", "theme"],
            Self::Species => &["common_name", "linnaean_name", "assemblage", "taxa", "species_link"],
            Self::Grant => &["grant_name", "grant_scheme", "url", "grant_summary"],
            Self::Habitat => &["habitat"],
        }
    }

    #[must_use]
    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            Self::Measure => &["measure"],
            Self::Area => &["area_name"],
            Self::Priority => &["biodiversity_priority", "theme"],
            Self::Species => &["common_name"],
            Self::Grant => &["grant_name"],
            Self::Habitat => &["habitat"],
        }
    }

    /// Parse a raw identifier according to this entity's key type.
    ///
    /// # Errors
    /// Returns [`CoreError::Parse`] when an integer-keyed entity receives a non-integer id,
    /// or any entity receives an empty id.
    pub fn parse_id(self, raw: &str) -> Result<EntityId, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Parse(format!("{} id must not be empty", self.as_str())));
        }
        match self.id_kind() {
            IdKind::Integer => trimmed.parse::<i64>().map(EntityId::Int).map_err(|err| {
                CoreError::Parse(format!("{} id `{trimmed}` is not an integer: {err}", self.as_str()))
            }),
            IdKind::Text => Ok(EntityId::Text(trimmed.to_string())),
        }
    }

    /// Check that `fields` only names scalar columns of this entity.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] for unknown columns, and for required columns that are
    /// null or blank when `require_all` is set.
    pub fn validate_fields(self, fields: &FieldMap, require_all: bool) -> Result<(), CoreError> {
        let allowed = self.scalar_columns();
        if let Some(unknown) = fields.keys().find(|key| !allowed.contains(&key.as_str())) {
            return Err(CoreError::Validation(format!(
                "unknown field `{unknown}` for {}",
                self.as_str()
            )));
        }

        for required in self.required_columns() {
            match fields.get(*required) {
                Some(value) if value.is_blank() => {
                    return Err(CoreError::Validation(format!(
                        "{} field `{required}` MUST NOT be empty",
                        self.as_str()
                    )));
                }
                None if require_all => {
                    return Err(CoreError::Validation(format!(
                        "{} field `{required}` is required",
                        self.as_str()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer or text primary key of an entity row.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl EntityId {
    #[must_use]
    pub fn kind(&self) -> IdKind {
        match self {
            Self::Int(_) => IdKind::Integer,
            Self::Text(_) => IdKind::Text,
        }
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(value) => value.trim().is_empty(),
            Self::Integer(_) | Self::Real(_) => false,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// Build a [`FieldMap`] from `(column, value)` pairs.
#[must_use]
pub fn fields<I, K, V>(pairs: I) -> FieldMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FieldValue>,
{
    pairs.into_iter().map(|(key, value)| (key.into(), value.into())).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub fields: FieldMap,
}

/// Reference tables whose rows are linked from measures through bridge tables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    MeasureType,
    Stakeholder,
    Benefit,
}

impl LookupKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MeasureType => "measure_type",
            Self::Stakeholder => "stakeholder",
            Self::Benefit => "benefit",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "measure_type" | "measure-type" => Some(Self::MeasureType),
            "stakeholder" => Some(Self::Stakeholder),
            "benefit" => Some(Self::Benefit),
            _ => None,
        }
    }

    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::MeasureType => "measure_type",
            Self::Stakeholder => "stakeholder",
            Self::Benefit => "benefits",
        }
    }

    #[must_use]
    pub fn id_column(self) -> &'static str {
        match self {
            Self::MeasureType => "measure_type_id",
            Self::Stakeholder => "stakeholder_id",
            Self::Benefit => "benefit_id",
        }
    }

    #[must_use]
    pub fn label_column(self) -> &'static str {
        match self {
            Self::MeasureType => "measure_type",
            Self::Stakeholder => "stakeholder",
            Self::Benefit => "benefit",
        }
    }
}

/// Full replacement membership for one bridge category of an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipSet {
    pub category: String,
    pub members: Vec<EntityId>,
}

impl RelationshipSet {
    #[must_use]
    pub fn new<I, T>(category: &str, members: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        Self {
            category: category.to_string(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Members with duplicates removed, first occurrence wins.
    #[must_use]
    pub fn distinct_members(&self) -> Vec<&EntityId> {
        let mut seen = std::collections::BTreeSet::new();
        self.members.iter().filter(|member| seen.insert(*member)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_str() {
        for entity_type in EntityType::ALL {
            assert_eq!(EntityType::parse(entity_type.as_str()), Some(entity_type));
        }
        assert_eq!(EntityType::parse("grant_table"), None);
    }

    #[test]
    fn parse_id_respects_key_kind() -> Result<(), CoreError> {
        assert_eq!(EntityType::Measure.parse_id(" 42 ")?, EntityId::Int(42));
        assert_eq!(EntityType::Grant.parse_id("CSAM1")?, EntityId::Text("CSAM1".to_string()));
        assert!(EntityType::Area.parse_id("north").is_err());
        assert!(EntityType::Grant.parse_id("   ").is_err());
        Ok(())
    }

    #[test]
    fn validate_fields_rejects_unknown_and_blank_required() {
        let unknown = fields([("area_name", "Moor"), ("colour", "green")]);
        assert!(matches!(
            EntityType::Area.validate_fields(&unknown, true),
            Err(CoreError::Validation(message)) if message.contains("colour")
        ));

        let blank = fields([("area_name", "   ")]);
        assert!(EntityType::Area.validate_fields(&blank, false).is_err());

        let missing_theme = fields([("biodiversity_priority", "Restore meadows")]);
        assert!(EntityType::Priority.validate_fields(&missing_theme, true).is_err());
        assert!(EntityType::Priority.validate_fields(&missing_theme, false).is_ok());
    }

    #[test]
    fn relationship_set_distinct_members_keeps_first_occurrence() {
        let set = RelationshipSet::new("types", [3_i64, 1, 3, 2, 1]);
        let distinct: Vec<_> = set.distinct_members().into_iter().cloned().collect();
        assert_eq!(distinct, vec![EntityId::Int(3), EntityId::Int(1), EntityId::Int(2)]);
    }
}
