//! SQLite store for the LNRS registry.
//!
//! The store owns one connection with foreign keys enforced per statement. On top of it sit
//! the [transaction executor](SqliteStore::run_transaction), the
//! [cascade delete engine](SqliteStore::delete_with_cascade) and the
//! [atomic relationship update](SqliteStore::update_with_relationships).
//!
//! The connection uses a rollback journal rather than WAL so that the database file alone
//! always holds every committed change; snapshot artifacts are plain copies of that file.

use std::fs;
use std::path::Path;

use lnrs_core::{EntityId, FieldValue};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, DatabaseName};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

mod cascade;
mod entities;
mod error;
mod executor;
mod links;
mod schema;
pub mod timing;
mod update;

pub use cascade::{CascadeReport, CascadeStepReport};
pub use entities::DependentCount;
pub use error::{Result, StoreError};
pub use executor::Statement;
pub use links::{
    BulkLinkReport, HabitatLinkKind, LinkDeleteReport, MeasureAreaPriority, MeasureAreaPriorityLink,
};
pub use schema::LATEST_SCHEMA_VERSION;
pub use update::UpdateReport;

use schema::{CREATE_SCHEMA_MIGRATIONS_SQL, MIGRATION_001_SQL};

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl IntegrityReport {
    /// Healthy store: quick check passes, no dangling references, schema fully migrated.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.quick_check_ok
            && self.foreign_key_violations.is_empty()
            && self.schema_status.pending_versions.is_empty()
    }
}

impl SqliteStore {
    /// Open a SQLite-backed registry store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|source| StoreError::Open { path: path.to_path_buf(), source })?;

        conn.execute_batch(
            "PRAGMA journal_mode = DELETE;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|source| StoreError::Open { path: path.to_path_buf(), source })?;

        tracing::debug!("opened store at {}", path.display());
        Ok(Self { conn })
    }

    /// Open a disposable in-memory store, already migrated.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    /// Borrow the underlying connection for read queries.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than this build.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
        let mut version = current_schema_version(&self.conn)?;

        if version > LATEST_SCHEMA_VERSION {
            return Err(StoreError::Schema(format!(
                "database schema version {version} is newer than supported {LATEST_SCHEMA_VERSION}"
            )));
        }

        if version < 1 {
            let tx = self.conn.transaction()?;
            tx.execute_batch(MIGRATION_001_SQL)?;
            record_schema_version(&tx, 1)?;
            tx.commit()?;
            tracing::info!("applied schema migration 1");
            version = 1;
        }

        debug_assert_eq!(version, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String =
            self.conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))?;

        let mut stmt = self.conn.prepare("PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    /// Create an online SQLite backup of the current main database at `out_file`.
    ///
    /// # Errors
    /// Returns an error when the parent directory cannot be created or the backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                StoreError::Schema(format!(
                    "failed to create parent directory for backup file {}: {err}",
                    out_file.display()
                ))
            })?;
        }

        self.conn.backup(DatabaseName::Main, out_file, None)?;
        tracing::info!("wrote online backup to {}", out_file.display());
        Ok(())
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let applied_at = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| StoreError::Schema(format!("failed to format RFC3339 timestamp: {err}")))?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, applied_at],
    )?;
    Ok(())
}

pub(crate) fn id_value(id: &EntityId) -> Value {
    match id {
        EntityId::Int(value) => Value::Integer(*value),
        EntityId::Text(value) => Value::Text(value.clone()),
    }
}

pub(crate) fn field_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(value) => Value::Integer(*value),
        FieldValue::Real(value) => Value::Real(*value),
        FieldValue::Text(value) => Value::Text(value.clone()),
    }
}

pub(crate) fn read_id(value: ValueRef<'_>) -> EntityId {
    match value {
        ValueRef::Integer(value) => EntityId::Int(value),
        ValueRef::Real(value) => EntityId::Text(value.to_string()),
        ValueRef::Null => EntityId::Text(String::new()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            EntityId::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

pub(crate) fn read_field(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(value) => FieldValue::Integer(value),
        ValueRef::Real(value) => FieldValue::Real(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            FieldValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use lnrs_core::{fields, EntityId, EntityType, LookupKind};

    use crate::{Result, SqliteStore};

    /// Store with one measure (1), area (1), priority (1), species (1), grant (G1),
    /// habitat (1) and every dependent table populated for them.
    pub(crate) fn populated_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open_in_memory()?;
        store.create_entity(EntityType::Measure, None, &fields([("measure", "Hedgerow planting")]))?;
        store.create_entity(EntityType::Area, None, &fields([("area_name", "North Downs")]))?;
        store.create_entity(
            EntityType::Priority,
            None,
            &fields([("biodiversity_priority", "Restore chalk grassland"), ("theme", "Grassland and farmland")]),
        )?;
        store.create_entity(EntityType::Species, None, &fields([("common_name", "Adder")]))?;
        store.create_entity(
            EntityType::Grant,
            Some(EntityId::from("G1")),
            &fields([("grant_name", "Hedgerow grant")]),
        )?;
        store.create_entity(EntityType::Habitat, None, &fields([("habitat", "Chalk grassland")]))?;

        let measure_type = store.create_lookup(LookupKind::MeasureType, "Create")?;
        let stakeholder = store.create_lookup(LookupKind::Stakeholder, "Farmers")?;
        let benefit = store.create_lookup(LookupKind::Benefit, "Carbon storage")?;

        store.add_relationships(EntityType::Measure, &EntityId::Int(1), "types", &[EntityId::Int(measure_type)])?;
        store.add_relationships(
            EntityType::Measure,
            &EntityId::Int(1),
            "stakeholders",
            &[EntityId::Int(stakeholder)],
        )?;
        store.add_relationships(EntityType::Measure, &EntityId::Int(1), "benefits", &[EntityId::Int(benefit)])?;
        store.add_relationships(EntityType::Measure, &EntityId::Int(1), "species", &[EntityId::Int(1)])?;
        store.create_measure_area_priority_link(1, 1, 1)?;
        store.add_grant_to_link(1, 1, 1, "G1")?;
        store.create_species_area_priority_link(1, 1, 1)?;
        store.add_funding_scheme(1, "Countryside Stewardship")?;
        store.create_habitat_link(crate::HabitatLinkKind::Creation, 1, 1)?;
        store.create_habitat_link(crate::HabitatLinkKind::Management, 1, 1)?;
        Ok(store)
    }

    pub(crate) fn count_rows(store: &SqliteStore, table: &str, column: &str, id: &EntityId) -> Result<i64> {
        Ok(store.conn().query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
            [crate::id_value(id)],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnrs_core::EntityType;

    #[test]
    fn sqlite_enforces_foreign_keys_per_statement() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let fk_result = store.conn().execute(
            "INSERT INTO measure_has_type(measure_id, measure_type_id) VALUES (?1, ?2)",
            params![999_i64, 999_i64],
        );
        assert!(fk_result.is_err());
        Ok(())
    }

    #[test]
    fn migrate_is_idempotent_and_reports_up_to_date() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1]);

        store.migrate()?;
        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn integrity_check_reports_clean_populated_database() -> Result<()> {
        let store = test_support::populated_store()?;
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert!(report.is_healthy());
        Ok(())
    }

    #[test]
    fn backup_database_copies_committed_rows() -> anyhow::Result<()> {
        let source = test_support::populated_store()?;
        let dir = tempfile::tempdir()?;
        let backup_file = dir.path().join("nested").join("copy.sqlite3");
        source.backup_database(&backup_file)?;

        let copy = SqliteStore::open(&backup_file)?;
        assert_eq!(copy.count_entities(EntityType::Measure)?, 1);
        assert!(copy.integrity_check()?.is_healthy());
        Ok(())
    }

    #[test]
    fn relation_graph_covers_every_foreign_key_onto_an_entity() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let tables: Vec<String> = {
            let mut stmt = store.conn().prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        for table in &tables {
            let mut stmt = store.conn().prepare(&format!("PRAGMA foreign_key_list({table})"))?;
            let fks = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(2)?, row.get::<_, String>(3)?, row.get::<_, Option<String>>(4)?))
            })?;
            for fk in fks {
                let (parent_table, from_column, to_column) = fk?;
                let Some(entity_type) =
                    EntityType::ALL.into_iter().find(|et| et.table() == parent_table)
                else {
                    continue;
                };
                if to_column.as_deref() != Some(entity_type.id_column()) {
                    continue;
                }
                let listed = lnrs_core::dependents_of(entity_type)
                    .iter()
                    .any(|dep| dep.table == table.as_str() && dep.column == from_column);
                assert!(listed, "{table}.{from_column} references {entity_type} but is not a listed dependent");
            }
        }
        Ok(())
    }
}
