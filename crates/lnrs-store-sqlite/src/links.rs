//! Direct link operations on the three-way and habitat bridge tables.

use std::collections::BTreeSet;

use lnrs_core::{CoreError, EntityId, EntityType};
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{Result, SqliteStore, Statement, StoreError};

/// Key of one `measure_area_priority` row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct MeasureAreaPriority {
    pub measure_id: i64,
    pub area_id: i64,
    pub priority_id: i64,
}

impl MeasureAreaPriority {
    #[must_use]
    pub fn new(measure_id: i64, area_id: i64, priority_id: i64) -> Self {
        Self { measure_id, area_id, priority_id }
    }
}

/// A measure-area-priority link with the grants attached to it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MeasureAreaPriorityLink {
    #[serde(flatten)]
    pub link: MeasureAreaPriority,
    pub grant_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LinkDeleteReport {
    pub grant_links_removed: usize,
    pub link_removed: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BulkLinkReport {
    pub created: usize,
    pub skipped: Vec<MeasureAreaPriority>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HabitatLinkKind {
    Creation,
    Management,
}

impl HabitatLinkKind {
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Creation => "habitat_creation_area",
            Self::Management => "habitat_management_area",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "creation" => Some(Self::Creation),
            "management" => Some(Self::Management),
            _ => None,
        }
    }
}

impl SqliteStore {
    /// Link a measure to an area and priority. Returns false when the link already exists.
    ///
    /// # Errors
    /// Returns a SQLite error when any of the three ids does not exist.
    pub fn create_measure_area_priority_link(
        &self,
        measure_id: i64,
        area_id: i64,
        priority_id: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO measure_area_priority(measure_id, area_id, priority_id)
             VALUES (?1, ?2, ?3)",
            params![measure_id, area_id, priority_id],
        )?;
        Ok(rows > 0)
    }

    /// Remove one measure-area-priority link and the grants attached to it.
    ///
    /// Grant links go first, each delete committing on its own as in the cascade engine.
    ///
    /// # Errors
    /// Returns a SQLite error when either delete fails; grant links removed before the failure
    /// stay removed.
    pub fn delete_measure_area_priority_link(
        &self,
        measure_id: i64,
        area_id: i64,
        priority_id: i64,
    ) -> Result<LinkDeleteReport> {
        let grant_links_removed = self.conn.execute(
            "DELETE FROM measure_area_priority_grant
             WHERE measure_id = ?1 AND area_id = ?2 AND priority_id = ?3",
            params![measure_id, area_id, priority_id],
        )?;
        let link_rows = self.conn.execute(
            "DELETE FROM measure_area_priority
             WHERE measure_id = ?1 AND area_id = ?2 AND priority_id = ?3",
            params![measure_id, area_id, priority_id],
        )?;
        tracing::info!(
            measure_id,
            area_id,
            priority_id,
            grant_links_removed,
            link_removed = link_rows > 0,
            "deleted measure-area-priority link"
        );
        Ok(LinkDeleteReport { grant_links_removed, link_removed: link_rows > 0 })
    }

    /// Create every measure × area × priority combination that does not exist yet.
    ///
    /// All new links are inserted in one transaction; existing ones are reported as skipped.
    ///
    /// # Errors
    /// Returns a validation error when any input list is empty, or
    /// [`StoreError::Transaction`] when an id does not exist. Nothing is inserted then.
    pub fn bulk_create_measure_area_priority_links(
        &mut self,
        measure_ids: &[i64],
        area_ids: &[i64],
        priority_ids: &[i64],
    ) -> Result<BulkLinkReport> {
        if measure_ids.is_empty() || area_ids.is_empty() || priority_ids.is_empty() {
            return Err(CoreError::Validation(
                "bulk link creation needs at least one measure, area and priority".to_string(),
            )
            .into());
        }

        let mut requested = BTreeSet::new();
        for &measure_id in measure_ids {
            for &area_id in area_ids {
                for &priority_id in priority_ids {
                    requested.insert(MeasureAreaPriority::new(measure_id, area_id, priority_id));
                }
            }
        }

        let mut report = BulkLinkReport::default();
        let mut statements = Vec::new();
        for link in requested {
            if self.measure_area_priority_exists(link)? {
                report.skipped.push(link);
            } else {
                statements.push(Statement::new(
                    "INSERT INTO measure_area_priority(measure_id, area_id, priority_id) VALUES (?1, ?2, ?3)",
                    vec![
                        Value::Integer(link.measure_id),
                        Value::Integer(link.area_id),
                        Value::Integer(link.priority_id),
                    ],
                ));
            }
        }

        report.created = self.run_transaction(&statements)?.iter().sum();
        tracing::info!(
            created = report.created,
            skipped = report.skipped.len(),
            "bulk created measure-area-priority links"
        );
        Ok(report)
    }

    /// Every measure-area-priority link, optionally narrowed to one measure, with its grants.
    ///
    /// # Errors
    /// Returns a SQLite error when a query fails.
    pub fn measure_area_priority_links(
        &self,
        measure_id: Option<i64>,
    ) -> Result<Vec<MeasureAreaPriorityLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT measure_id, area_id, priority_id FROM measure_area_priority
             WHERE ?1 IS NULL OR measure_id = ?1
             ORDER BY measure_id, area_id, priority_id",
        )?;
        let links = stmt
            .query_map(params![measure_id], |row| {
                Ok(MeasureAreaPriority::new(row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut grants = self.conn.prepare(
            "SELECT grant_id FROM measure_area_priority_grant
             WHERE measure_id = ?1 AND area_id = ?2 AND priority_id = ?3
             ORDER BY grant_id",
        )?;
        links
            .into_iter()
            .map(|link| {
                let grant_ids = grants
                    .query_map(params![link.measure_id, link.area_id, link.priority_id], |row| {
                        row.get(0)
                    })?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(MeasureAreaPriorityLink { link, grant_ids })
            })
            .collect()
    }

    /// Attach a grant to an existing measure-area-priority link.
    ///
    /// # Errors
    /// Returns a SQLite constraint error when the link or the grant does not exist.
    pub fn add_grant_to_link(
        &self,
        measure_id: i64,
        area_id: i64,
        priority_id: i64,
        grant_id: &str,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO measure_area_priority_grant(measure_id, area_id, priority_id, grant_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![measure_id, area_id, priority_id, grant_id],
        )?;
        Ok(rows > 0)
    }

    pub fn remove_grant_from_link(
        &self,
        measure_id: i64,
        area_id: i64,
        priority_id: i64,
        grant_id: &str,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM measure_area_priority_grant
             WHERE measure_id = ?1 AND area_id = ?2 AND priority_id = ?3 AND grant_id = ?4",
            params![measure_id, area_id, priority_id, grant_id],
        )?;
        Ok(rows > 0)
    }

    pub fn create_species_area_priority_link(
        &self,
        species_id: i64,
        area_id: i64,
        priority_id: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO species_area_priority(species_id, area_id, priority_id)
             VALUES (?1, ?2, ?3)",
            params![species_id, area_id, priority_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_species_area_priority_link(
        &self,
        species_id: i64,
        area_id: i64,
        priority_id: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM species_area_priority
             WHERE species_id = ?1 AND area_id = ?2 AND priority_id = ?3",
            params![species_id, area_id, priority_id],
        )?;
        Ok(rows > 0)
    }

    pub fn create_habitat_link(
        &self,
        kind: HabitatLinkKind,
        habitat_id: i64,
        area_id: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            &format!("INSERT OR IGNORE INTO {}(habitat_id, area_id) VALUES (?1, ?2)", kind.table()),
            params![habitat_id, area_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_habitat_link(
        &self,
        kind: HabitatLinkKind,
        habitat_id: i64,
        area_id: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            &format!("DELETE FROM {} WHERE habitat_id = ?1 AND area_id = ?2", kind.table()),
            params![habitat_id, area_id],
        )?;
        Ok(rows > 0)
    }

    /// Record a local funding scheme for an area and return the new row id.
    ///
    /// # Errors
    /// Returns a validation error for a blank scheme, [`StoreError::NotFound`] for a missing
    /// area.
    pub fn add_funding_scheme(&self, area_id: i64, scheme: &str) -> Result<i64> {
        let scheme = scheme.trim();
        if scheme.is_empty() {
            return Err(CoreError::Validation("funding scheme MUST NOT be empty".to_string()).into());
        }
        let area = EntityId::Int(area_id);
        if !self.entity_exists(EntityType::Area, &area)? {
            return Err(StoreError::NotFound { entity_type: EntityType::Area, id: area });
        }
        self.conn.execute(
            "INSERT INTO area_funding_schemes(area_id, local_funding_schemes) VALUES (?1, ?2)",
            params![area_id, scheme],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn measure_area_priority_exists(&self, link: MeasureAreaPriority) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM measure_area_priority
                 WHERE measure_id = ?1 AND area_id = ?2 AND priority_id = ?3",
                params![link.measure_id, link.area_id, link.priority_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use lnrs_core::fields;

    use super::*;
    use crate::test_support::{count_rows, populated_store};

    #[test]
    fn link_delete_removes_attached_grants_first() -> Result<()> {
        let store = populated_store()?;
        let report = store.delete_measure_area_priority_link(1, 1, 1)?;
        assert_eq!(report, LinkDeleteReport { grant_links_removed: 1, link_removed: true });
        assert_eq!(count_rows(&store, "measure_area_priority_grant", "grant_id", &EntityId::from("G1"))?, 0);

        let again = store.delete_measure_area_priority_link(1, 1, 1)?;
        assert_eq!(again, LinkDeleteReport { grant_links_removed: 0, link_removed: false });
        Ok(())
    }

    #[test]
    fn links_are_listed_with_their_grants() -> Result<()> {
        let mut store = populated_store()?;
        store.create_entity(EntityType::Measure, None, &fields([("measure", "Dig ponds")]))?;
        store.bulk_create_measure_area_priority_links(&[2], &[1], &[1])?;

        let all = store.measure_area_priority_links(None)?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].link, MeasureAreaPriority::new(1, 1, 1));
        assert_eq!(all[0].grant_ids, vec!["G1".to_string()]);
        assert!(all[1].grant_ids.is_empty());

        let second = store.measure_area_priority_links(Some(2))?;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].link.measure_id, 2);
        Ok(())
    }

    #[test]
    fn bulk_create_skips_existing_links() -> Result<()> {
        let mut store = populated_store()?;
        store.create_entity(EntityType::Area, None, &fields([("area_name", "Low Weald")]))?;

        let report = store.bulk_create_measure_area_priority_links(&[1], &[1, 2], &[1])?;
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, vec![MeasureAreaPriority::new(1, 1, 1)]);
        Ok(())
    }

    #[test]
    fn bulk_create_is_all_or_nothing() -> Result<()> {
        let mut store = populated_store()?;
        store.create_entity(EntityType::Area, None, &fields([("area_name", "Low Weald")]))?;

        let err = store.bulk_create_measure_area_priority_links(&[1], &[2, 77], &[1]).err();
        assert!(matches!(err, Some(StoreError::Transaction { .. })));
        assert_eq!(count_rows(&store, "measure_area_priority", "area_id", &EntityId::Int(2))?, 0);

        assert!(store.bulk_create_measure_area_priority_links(&[], &[1], &[1]).is_err());
        Ok(())
    }

    #[test]
    fn grant_links_require_an_existing_link() -> Result<()> {
        let store = populated_store()?;
        assert!(!store.add_grant_to_link(1, 1, 1, "G1")?);
        assert!(store.remove_grant_from_link(1, 1, 1, "G1")?);
        assert!(!store.remove_grant_from_link(1, 1, 1, "G1")?);

        let missing = store.add_grant_to_link(1, 1, 2, "G1").err();
        assert!(missing.is_some_and(|err| err.is_constraint_violation()));
        Ok(())
    }

    #[test]
    fn species_and_habitat_links_toggle() -> Result<()> {
        let store = populated_store()?;
        assert!(store.delete_species_area_priority_link(1, 1, 1)?);
        assert!(store.create_species_area_priority_link(1, 1, 1)?);
        assert!(!store.create_species_area_priority_link(1, 1, 1)?);

        assert!(store.delete_habitat_link(HabitatLinkKind::Management, 1, 1)?);
        assert!(!store.delete_habitat_link(HabitatLinkKind::Management, 1, 1)?);
        assert_eq!(count_rows(&store, "habitat_creation_area", "habitat_id", &EntityId::Int(1))?, 1);
        assert!(store.create_habitat_link(HabitatLinkKind::Creation, 1, 9).is_err());
        Ok(())
    }

    #[test]
    fn funding_scheme_needs_existing_area_and_text() -> Result<()> {
        let store = populated_store()?;
        assert!(store.add_funding_scheme(1, "Local nature fund")? > 0);
        assert!(matches!(store.add_funding_scheme(9, "Fund"), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.add_funding_scheme(1, "  "), Err(StoreError::Validation(_))));
        Ok(())
    }
}
