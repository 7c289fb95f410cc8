use lnrs_core::{
    dependents_of, CoreError, EntityId, EntityRecord, EntityType, FieldMap, IdKind, LookupKind,
};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde::Serialize;

use crate::{field_value, id_value, read_field, read_id, Result, SqliteStore, StoreError};

/// Rows in one dependent table that a cascade delete would remove.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DependentCount {
    pub table: &'static str,
    pub column: &'static str,
    pub rows: i64,
}

impl SqliteStore {
    /// Next free integer id: one past the current maximum.
    ///
    /// # Errors
    /// Returns a validation error for text-keyed entities.
    pub fn next_id(&self, entity_type: EntityType) -> Result<i64> {
        if entity_type.id_kind() != IdKind::Integer {
            return Err(CoreError::Validation(format!(
                "{entity_type} ids are supplied by the caller"
            ))
            .into());
        }
        let sql = format!(
            "SELECT COALESCE(MAX({}), 0) + 1 FROM {}",
            entity_type.id_column(),
            entity_type.table()
        );
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Insert a new entity row and return its id.
    ///
    /// Integer-keyed entities get the next free id when `id` is `None`. Text-keyed entities
    /// must be given one.
    ///
    /// # Errors
    /// Returns a validation error for unknown or empty required fields,
    /// [`StoreError::Duplicate`] when the id is taken, or a SQLite error on insert failure.
    pub fn create_entity(
        &self,
        entity_type: EntityType,
        id: Option<EntityId>,
        fields: &FieldMap,
    ) -> Result<EntityId> {
        entity_type.validate_fields(fields, true)?;

        let id = match id {
            Some(id) if id.kind() != entity_type.id_kind() => {
                return Err(CoreError::Validation(format!(
                    "{entity_type} id `{id}` has the wrong key type"
                ))
                .into());
            }
            Some(id) => {
                if self.entity_exists(entity_type, &id)? {
                    return Err(StoreError::Duplicate { entity_type, id });
                }
                id
            }
            None if entity_type.id_kind() == IdKind::Integer => {
                EntityId::Int(self.next_id(entity_type)?)
            }
            None => {
                return Err(CoreError::Validation(format!("{entity_type} requires an explicit id"))
                    .into());
            }
        };

        let mut columns = vec![entity_type.id_column()];
        let mut values = vec![id_value(&id)];
        for (column, value) in fields {
            columns.push(column.as_str());
            values.push(field_value(value));
        }
        let placeholders = (1..=columns.len()).map(|n| format!("?{n}")).collect::<Vec<_>>();
        let sql = format!(
            "INSERT INTO {}({}) VALUES ({})",
            entity_type.table(),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(values.iter()))?;

        tracing::info!(entity_type = entity_type.as_str(), id = %id, "created entity");
        Ok(id)
    }

    /// Read one entity row with all of its scalar columns.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when no row has this id.
    pub fn get_entity(&self, entity_type: EntityType, id: &EntityId) -> Result<EntityRecord> {
        let columns = entity_type.scalar_columns();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            columns.join(", "),
            entity_type.table(),
            entity_type.id_column()
        );
        let fields = self
            .conn
            .query_row(&sql, [id_value(id)], |row| {
                let mut fields = FieldMap::new();
                for (index, column) in columns.iter().enumerate() {
                    fields.insert((*column).to_string(), read_field(row.get_ref(index)?));
                }
                Ok(fields)
            })
            .optional()?;

        match fields {
            Some(fields) => Ok(EntityRecord { entity_type, id: id.clone(), fields }),
            None => Err(StoreError::NotFound { entity_type, id: id.clone() }),
        }
    }

    /// Every row of `entity_type`, ordered by id.
    ///
    /// # Errors
    /// Returns a SQLite error when the query fails.
    pub fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>> {
        let columns = entity_type.scalar_columns();
        let sql = format!(
            "SELECT {id}, {} FROM {} ORDER BY {id}",
            columns.join(", "),
            entity_type.table(),
            id = entity_type.id_column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let id = read_id(row.get_ref(0)?);
            let mut fields = FieldMap::new();
            for (index, column) in columns.iter().enumerate() {
                fields.insert((*column).to_string(), read_field(row.get_ref(index + 1)?));
            }
            Ok(EntityRecord { entity_type, id, fields })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn entity_exists(&self, entity_type: EntityType, id: &EntityId) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            entity_type.table(),
            entity_type.id_column()
        );
        Ok(self.conn.query_row(&sql, [id_value(id)], |row| row.get(0))?)
    }

    pub fn count_entities(&self, entity_type: EntityType) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", entity_type.table());
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Per-table counts of rows referencing `id`, in cascade order.
    ///
    /// # Errors
    /// Returns a SQLite error when a count query fails.
    pub fn dependent_counts(
        &self,
        entity_type: EntityType,
        id: &EntityId,
    ) -> Result<Vec<DependentCount>> {
        let key = id_value(id);
        dependents_of(entity_type)
            .iter()
            .map(|dependent| {
                let sql = format!(
                    "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                    dependent.table, dependent.column
                );
                let rows = self.conn.query_row(&sql, [&key], |row| row.get(0))?;
                Ok(DependentCount { table: dependent.table, column: dependent.column, rows })
            })
            .collect()
    }

    /// Add a measure type, stakeholder or benefit label and return its id.
    ///
    /// # Errors
    /// Returns a validation error for blank or already-present labels.
    pub fn create_lookup(&self, kind: LookupKind, label: &str) -> Result<i64> {
        let label = label.trim();
        if label.is_empty() {
            return Err(CoreError::Validation(format!("{} label MUST NOT be empty", kind.as_str()))
                .into());
        }

        let existing: Option<i64> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    kind.id_column(),
                    kind.table(),
                    kind.label_column()
                ),
                params![label],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Err(CoreError::Validation(format!(
                "{} `{label}` already exists with id {id}",
                kind.as_str()
            ))
            .into());
        }

        let id: i64 = self.conn.query_row(
            &format!("SELECT COALESCE(MAX({}), 0) + 1 FROM {}", kind.id_column(), kind.table()),
            [],
            |row| row.get(0),
        )?;
        self.conn.execute(
            &format!(
                "INSERT INTO {}({}, {}) VALUES (?1, ?2)",
                kind.table(),
                kind.id_column(),
                kind.label_column()
            ),
            params![id, label],
        )?;
        tracing::info!(kind = kind.as_str(), id, "created lookup value");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use lnrs_core::{fields, FieldValue};

    use super::*;
    use crate::test_support::populated_store;

    #[test]
    fn create_assigns_next_integer_id() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        assert_eq!(store.next_id(EntityType::Area)?, 1);
        let first = store.create_entity(EntityType::Area, None, &fields([("area_name", "Weald")]))?;
        let second = store.create_entity(
            EntityType::Area,
            Some(EntityId::Int(10)),
            &fields([("area_name", "Thames")]),
        )?;
        let third = store.create_entity(EntityType::Area, None, &fields([("area_name", "Medway")]))?;

        assert_eq!(first, EntityId::Int(1));
        assert_eq!(second, EntityId::Int(10));
        assert_eq!(third, EntityId::Int(11));
        assert_eq!(store.count_entities(EntityType::Area)?, 3);
        Ok(())
    }

    #[test]
    fn grant_requires_unique_caller_id() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let grant = fields([("grant_name", "Woodland creation offer")]);

        assert!(matches!(
            store.create_entity(EntityType::Grant, None, &grant),
            Err(StoreError::Validation(_))
        ));
        store.create_entity(EntityType::Grant, Some(EntityId::from("WCO")), &grant)?;
        assert!(matches!(
            store.create_entity(EntityType::Grant, Some(EntityId::from("WCO")), &grant),
            Err(StoreError::Duplicate { .. })
        ));
        assert!(store.next_id(EntityType::Grant).is_err());
        Ok(())
    }

    #[test]
    fn get_entity_returns_all_scalar_columns() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let id = store.create_entity(
            EntityType::Species,
            None,
            &fields([("common_name", "Hazel dormouse"), ("taxa", "Mammal")]),
        )?;
        let record = store.get_entity(EntityType::Species, &id)?;

        assert_eq!(record.fields.len(), EntityType::Species.scalar_columns().len());
        assert_eq!(record.fields.get("taxa"), Some(&FieldValue::from("Mammal")));
        assert_eq!(record.fields.get("linnaean_name"), Some(&FieldValue::Null));

        assert!(matches!(
            store.get_entity(EntityType::Species, &EntityId::Int(99)),
            Err(StoreError::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn list_entities_orders_by_id() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        assert!(store.list_entities(EntityType::Grant)?.is_empty());
        for id in ["WCO", "CS1"] {
            store.create_entity(EntityType::Grant, Some(EntityId::from(id)), &fields([("grant_name", id)]))?;
        }

        let grants = store.list_entities(EntityType::Grant)?;
        let ids: Vec<_> = grants.iter().map(|record| record.id.clone()).collect();
        assert_eq!(ids, vec![EntityId::from("CS1"), EntityId::from("WCO")]);
        assert_eq!(grants[0].fields.get("grant_name"), Some(&FieldValue::from("CS1")));
        assert_eq!(grants[0].fields.get("url"), Some(&FieldValue::Null));
        Ok(())
    }

    #[test]
    fn dependent_counts_preview_matches_fixture() -> Result<()> {
        let store = populated_store()?;
        let counts = store.dependent_counts(EntityType::Area, &EntityId::Int(1))?;
        assert_eq!(counts.len(), dependents_of(EntityType::Area).len());
        assert!(counts.iter().all(|count| count.rows == 1), "{counts:?}");
        Ok(())
    }

    #[test]
    fn lookup_labels_are_trimmed_and_unique() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let id = store.create_lookup(LookupKind::Benefit, "  Flood management ")?;
        assert_eq!(id, 1);
        assert!(store.create_lookup(LookupKind::Benefit, "Flood management").is_err());
        assert!(store.create_lookup(LookupKind::Stakeholder, "   ").is_err());
        Ok(())
    }
}
