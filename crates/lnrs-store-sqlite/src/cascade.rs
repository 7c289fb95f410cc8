//! Cascade delete engine.
//!
//! Dependents are removed one table at a time in Relation Graph order, each `DELETE` committing
//! on its own, and the parent row goes last. SQLite checks foreign keys per statement, so the
//! order alone keeps every step valid. A failed step leaves earlier steps committed and the
//! parent in place; re-running the cascade after fixing the cause finishes the job because a
//! `DELETE ... WHERE column = id` on already-cleared rows removes nothing.

use lnrs_core::{dependents_of, Dependent, EntityId, EntityType};
use serde::Serialize;

use crate::timing::OperationTimer;
use crate::{id_value, Result, SqliteStore, StoreError};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CascadeStepReport {
    pub table: &'static str,
    pub column: &'static str,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CascadeReport {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub steps: Vec<CascadeStepReport>,
    pub dependents_removed: usize,
    /// False when the parent row was already gone, as on a retry after a completed cascade.
    pub parent_removed: bool,
}

impl CascadeReport {
    #[must_use]
    pub fn total_removed(&self) -> usize {
        self.dependents_removed + usize::from(self.parent_removed)
    }
}

impl SqliteStore {
    /// Delete an entity and every row referencing it, using the Relation Graph order.
    ///
    /// # Errors
    /// Returns [`StoreError::CascadeStep`] naming the failed step and the number of dependent
    /// rows already removed, or a validation error when `entity_id` has the wrong key type.
    pub fn delete_with_cascade(
        &self,
        entity_type: EntityType,
        entity_id: &EntityId,
    ) -> Result<CascadeReport> {
        self.delete_with_dependents(entity_type, entity_id, dependents_of(entity_type))
    }

    /// Cascade delete driven by an explicit dependent list.
    ///
    /// # Errors
    /// See [`SqliteStore::delete_with_cascade`].
    pub fn delete_with_dependents(
        &self,
        entity_type: EntityType,
        entity_id: &EntityId,
        dependents: &[Dependent],
    ) -> Result<CascadeReport> {
        if entity_id.kind() != entity_type.id_kind() {
            return Err(lnrs_core::CoreError::Validation(format!(
                "{entity_type} id `{entity_id}` has the wrong key type"
            ))
            .into());
        }

        let timer = OperationTimer::start("cascade_delete");
        let result = self.run_cascade(entity_type, entity_id, dependents);
        timer.record(result)
    }

    fn run_cascade(
        &self,
        entity_type: EntityType,
        entity_id: &EntityId,
        dependents: &[Dependent],
    ) -> Result<CascadeReport> {
        let total_steps = dependents.len() + 1;
        let key = id_value(entity_id);
        let mut steps = Vec::with_capacity(dependents.len());
        let mut removed = 0_usize;

        for (index, dependent) in dependents.iter().enumerate() {
            let step = index + 1;
            let sql = format!("DELETE FROM {} WHERE {} = ?1", dependent.table, dependent.column);
            let rows = self.conn.execute(&sql, [&key]).map_err(|source| {
                tracing::error!(
                    entity_type = entity_type.as_str(),
                    entity_id = %entity_id,
                    step,
                    total_steps,
                    table = dependent.table,
                    removed_before = removed,
                    "cascade step failed: {source}"
                );
                StoreError::CascadeStep {
                    entity_type,
                    entity_id: entity_id.clone(),
                    step,
                    total_steps,
                    table: dependent.table,
                    removed_before: removed,
                    source,
                }
            })?;

            tracing::info!(
                entity_type = entity_type.as_str(),
                entity_id = %entity_id,
                step,
                table = dependent.table,
                rows,
                "cleared dependent rows"
            );
            removed += rows;
            steps.push(CascadeStepReport { table: dependent.table, column: dependent.column, rows });
        }

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            entity_type.table(),
            entity_type.id_column()
        );
        let parent_rows = self.conn.execute(&sql, [&key]).map_err(|source| {
            tracing::error!(
                entity_type = entity_type.as_str(),
                entity_id = %entity_id,
                step = total_steps,
                total_steps,
                removed_before = removed,
                "parent delete failed, dependent list is incomplete: {source}"
            );
            StoreError::CascadeStep {
                entity_type,
                entity_id: entity_id.clone(),
                step: total_steps,
                total_steps,
                table: entity_type.table(),
                removed_before: removed,
                source,
            }
        })?;

        let report = CascadeReport {
            entity_type,
            entity_id: entity_id.clone(),
            steps,
            dependents_removed: removed,
            parent_removed: parent_rows > 0,
        };
        tracing::info!(
            entity_type = entity_type.as_str(),
            entity_id = %entity_id,
            dependents_removed = report.dependents_removed,
            parent_removed = report.parent_removed,
            total_removed = report.total_removed(),
            "cascade delete finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use lnrs_core::{fields, EntityType};

    use super::*;
    use crate::test_support::{count_rows, populated_store};

    fn id_for(entity_type: EntityType) -> EntityId {
        match entity_type {
            EntityType::Grant => EntityId::from("G1"),
            _ => EntityId::Int(1),
        }
    }

    #[test]
    fn cascade_clears_every_dependent_and_the_parent() -> Result<()> {
        for entity_type in EntityType::ALL {
            let store = populated_store()?;
            let id = id_for(entity_type);

            let report = store.delete_with_cascade(entity_type, &id)?;
            assert!(report.parent_removed, "{entity_type}");
            assert!(report.dependents_removed >= 1, "{entity_type}");
            assert_eq!(report.steps.len(), dependents_of(entity_type).len());

            for dependent in dependents_of(entity_type) {
                assert_eq!(
                    count_rows(&store, dependent.table, dependent.column, &id)?,
                    0,
                    "{entity_type}: {} still references {id}",
                    dependent.table
                );
            }
            assert!(!store.entity_exists(entity_type, &id)?);
            assert!(store.integrity_check()?.foreign_key_violations.is_empty());
        }
        Ok(())
    }

    #[test]
    fn reversed_order_reproduces_a_constraint_violation() -> Result<()> {
        let store = populated_store()?;
        let id = EntityId::Int(1);
        let reversed: Vec<Dependent> =
            dependents_of(EntityType::Measure).iter().rev().copied().collect();

        let err = store.delete_with_dependents(EntityType::Measure, &id, &reversed).err();
        let Some(err) = err else {
            panic!("reversed cascade order should violate the grant link foreign key");
        };
        assert!(err.is_constraint_violation());
        match err {
            StoreError::CascadeStep { step, table, removed_before, total_steps, .. } => {
                assert_eq!(table, "measure_area_priority");
                assert_eq!(step, 3);
                assert_eq!(total_steps, reversed.len() + 1);
                assert_eq!(removed_before, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.entity_exists(EntityType::Measure, &id)?);

        // Earlier steps stayed committed.
        assert_eq!(count_rows(&store, "measure_has_species", "measure_id", &id)?, 0);

        let retry = store.delete_with_cascade(EntityType::Measure, &id)?;
        assert!(retry.parent_removed);
        assert!(!store.entity_exists(EntityType::Measure, &id)?);
        Ok(())
    }

    #[test]
    fn stale_dependent_list_fails_on_parent_and_keeps_linked_rows() -> Result<()> {
        let mut store = SqliteStore::open_in_memory()?;
        store.create_entity(EntityType::Species, None, &fields([("common_name", "Skylark")]))?;
        store.create_entity(EntityType::Measure, None, &fields([("measure", "Leave fallow plots")]))?;
        store.add_relationships(EntityType::Measure, &EntityId::Int(1), "species", &[EntityId::Int(1)])?;

        let species = EntityId::Int(1);
        let stale: Vec<Dependent> = dependents_of(EntityType::Species)
            .iter()
            .filter(|dep| dep.table != "measure_has_species")
            .copied()
            .collect();
        let err = store.delete_with_dependents(EntityType::Species, &species, &stale).err();
        assert!(matches!(
            err,
            Some(StoreError::CascadeStep { step: 2, total_steps: 2, table: "species", .. })
        ));
        assert!(store.entity_exists(EntityType::Species, &species)?);

        let report = store.delete_with_cascade(EntityType::Species, &species)?;
        assert!(report.total_removed() >= 1);
        assert_eq!(count_rows(&store, "measure_has_species", "species_id", &species)?, 0);
        assert!(store.entity_exists(EntityType::Measure, &EntityId::Int(1))?);
        Ok(())
    }

    #[test]
    fn retry_after_completed_cascade_is_a_no_op() -> Result<()> {
        let store = populated_store()?;
        let id = EntityId::Int(1);
        store.delete_with_cascade(EntityType::Area, &id)?;

        let again = store.delete_with_cascade(EntityType::Area, &id)?;
        assert_eq!(again.total_removed(), 0);
        assert!(!again.parent_removed);
        Ok(())
    }

    #[test]
    fn wrong_key_type_is_rejected_before_any_delete() -> Result<()> {
        let store = populated_store()?;
        let err = store.delete_with_cascade(EntityType::Grant, &EntityId::Int(1)).err();
        assert!(matches!(err, Some(StoreError::Validation(_))));
        assert_eq!(store.count_entities(EntityType::Grant)?, 1);
        Ok(())
    }
}
