use std::collections::{BTreeMap, BTreeSet};

use lnrs_core::{
    bridge, bridges_of, Bridge, CoreError, EntityId, EntityType, FieldMap, RelationshipSet,
};
use serde::Serialize;

use crate::timing::OperationTimer;
use crate::{field_value, id_value, read_id, Result, SqliteStore, Statement, StoreError};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UpdateReport {
    pub scalar_rows: usize,
    pub relationships_cleared: usize,
    pub relationships_inserted: usize,
}

impl SqliteStore {
    /// Update scalar fields and replace bridge memberships of one entity as a single unit.
    ///
    /// Each listed category is cleared for this entity and refilled with its members; an empty
    /// member list clears the category. Categories not listed are left untouched. Either
    /// everything is applied or nothing is.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for a missing entity, a validation error for unknown
    /// fields or categories, or [`StoreError::Transaction`] when any statement fails, for
    /// instance a member id that does not exist.
    pub fn update_with_relationships(
        &mut self,
        entity_type: EntityType,
        id: &EntityId,
        fields: &FieldMap,
        relationships: &[RelationshipSet],
    ) -> Result<UpdateReport> {
        self.check_update(entity_type, id, fields, relationships)?;
        let bridges = resolve_bridges(entity_type, relationships)?;

        let mut statements = Vec::new();
        if !fields.is_empty() {
            statements.push(scalar_update(entity_type, id, fields));
        }
        for (bridge, _) in &bridges {
            statements.push(Statement::new(
                format!("DELETE FROM {} WHERE {} = ?1", bridge.table, bridge.owner_column),
                vec![id_value(id)],
            ));
        }
        let inserts_from = statements.len();
        for (bridge, set) in &bridges {
            for member in set.distinct_members() {
                statements.push(bridge_insert(bridge, id, member, false));
            }
        }

        let timer = OperationTimer::start("update_with_relationships");
        let counts = timer.record(self.run_transaction(&statements))?;

        let clears_from = usize::from(!fields.is_empty());
        let report = UpdateReport {
            scalar_rows: if fields.is_empty() { 0 } else { counts[0] },
            relationships_cleared: counts[clears_from..inserts_from].iter().sum(),
            relationships_inserted: counts[inserts_from..].iter().sum(),
        };
        tracing::info!(
            entity_type = entity_type.as_str(),
            id = %id,
            categories = bridges.len(),
            cleared = report.relationships_cleared,
            inserted = report.relationships_inserted,
            "updated entity with relationships"
        );
        Ok(report)
    }

    /// Everything [`Self::update_with_relationships`] checks before it writes: known fields,
    /// known and distinct categories, and an existing entity.
    ///
    /// # Errors
    /// Returns the same validation and [`StoreError::NotFound`] errors as the update.
    pub fn check_update(
        &self,
        entity_type: EntityType,
        id: &EntityId,
        fields: &FieldMap,
        relationships: &[RelationshipSet],
    ) -> Result<()> {
        entity_type.validate_fields(fields, false)?;
        resolve_bridges(entity_type, relationships)?;
        self.require_entity(entity_type, id)
    }

    /// Current members of one bridge category, ascending.
    ///
    /// # Errors
    /// Returns a validation error for an unknown category or [`StoreError::NotFound`] for a
    /// missing entity.
    pub fn relationships(
        &self,
        entity_type: EntityType,
        id: &EntityId,
        category: &str,
    ) -> Result<Vec<EntityId>> {
        let Some(bridge) = bridge(entity_type, category) else {
            return Err(unknown_category(entity_type, category));
        };
        self.require_entity(entity_type, id)?;
        self.bridge_members(bridge, id)
    }

    /// Members of every bridge category of one entity, keyed by category.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for a missing entity.
    pub fn all_relationships(
        &self,
        entity_type: EntityType,
        id: &EntityId,
    ) -> Result<BTreeMap<&'static str, Vec<EntityId>>> {
        self.require_entity(entity_type, id)?;
        bridges_of(entity_type)
            .iter()
            .map(|bridge| Ok((bridge.category, self.bridge_members(bridge, id)?)))
            .collect()
    }

    fn bridge_members(&self, bridge: &Bridge, owner: &EntityId) -> Result<Vec<EntityId>> {
        let sql = format!(
            "SELECT {member} FROM {table} WHERE {owner_column} = ?1 ORDER BY {member}",
            member = bridge.member_column,
            table = bridge.table,
            owner_column = bridge.owner_column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([id_value(owner)], |row| Ok(read_id(row.get_ref(0)?)))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Add members to one bridge category without touching existing rows.
    ///
    /// Members already linked are skipped. Returns the number of new rows.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] for a missing entity, a validation error for an unknown
    /// category, or [`StoreError::Transaction`] when a member does not exist.
    pub fn add_relationships(
        &mut self,
        entity_type: EntityType,
        id: &EntityId,
        category: &str,
        members: &[EntityId],
    ) -> Result<usize> {
        let set = RelationshipSet { category: category.to_string(), members: members.to_vec() };
        let bridges = resolve_bridges(entity_type, std::slice::from_ref(&set))?;
        self.require_entity(entity_type, id)?;

        let statements: Vec<Statement> = bridges
            .iter()
            .flat_map(|(bridge, set)| {
                set.distinct_members()
                    .into_iter()
                    .map(move |member| bridge_insert(bridge, id, member, true))
            })
            .collect();
        let counts = self.run_transaction(&statements)?;
        Ok(counts.iter().sum())
    }

    fn require_entity(&self, entity_type: EntityType, id: &EntityId) -> Result<()> {
        if id.kind() != entity_type.id_kind() {
            return Err(CoreError::Validation(format!(
                "{entity_type} id `{id}` has the wrong key type"
            ))
            .into());
        }
        if self.entity_exists(entity_type, id)? {
            Ok(())
        } else {
            Err(StoreError::NotFound { entity_type, id: id.clone() })
        }
    }
}

fn resolve_bridges<'a>(
    entity_type: EntityType,
    relationships: &'a [RelationshipSet],
) -> Result<Vec<(&'static Bridge, &'a RelationshipSet)>> {
    let mut seen = BTreeSet::new();
    relationships
        .iter()
        .map(|set| {
            let Some(bridge) = bridge(entity_type, &set.category) else {
                return Err(unknown_category(entity_type, &set.category));
            };
            if !seen.insert(bridge.category) {
                return Err(CoreError::Validation(format!(
                    "relationship category `{}` listed twice",
                    set.category
                ))
                .into());
            }
            Ok((bridge, set))
        })
        .collect()
}

fn unknown_category(entity_type: EntityType, category: &str) -> StoreError {
    CoreError::Validation(format!("{entity_type} has no relationship category `{category}`")).into()
}

fn scalar_update(entity_type: EntityType, id: &EntityId, fields: &FieldMap) -> Statement {
    let assignments = fields
        .keys()
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>();
    let mut params: Vec<_> = fields.values().map(field_value).collect();
    params.push(id_value(id));
    Statement::new(
        format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            entity_type.table(),
            assignments.join(", "),
            entity_type.id_column(),
            params.len()
        ),
        params,
    )
}

fn bridge_insert(bridge: &Bridge, owner: &EntityId, member: &EntityId, skip_existing: bool) -> Statement {
    let verb = if skip_existing { "INSERT OR IGNORE" } else { "INSERT" };
    Statement::new(
        format!(
            "{verb} INTO {}({}, {}) VALUES (?1, ?2)",
            bridge.table, bridge.owner_column, bridge.member_column
        ),
        vec![id_value(owner), id_value(member)],
    )
}
