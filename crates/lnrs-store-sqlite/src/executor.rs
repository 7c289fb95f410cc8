use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::{Result, SqliteStore, StoreError};

/// One parameterized statement of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self { sql: sql.into(), params }
    }
}

impl SqliteStore {
    /// Execute `statements` in order inside one transaction.
    ///
    /// Returns the affected-row count of each statement. The first failing statement rolls
    /// back the whole batch; its cause is returned with its zero-based index.
    ///
    /// Every statement sees foreign keys enforced immediately, so a batch must never delete a
    /// row that a later statement's constraint check still needs.
    ///
    /// # Errors
    /// Returns [`StoreError::Transaction`] when a statement fails, or a SQLite error when the
    /// transaction cannot be opened or committed.
    pub fn run_transaction(&mut self, statements: &[Statement]) -> Result<Vec<usize>> {
        let total = statements.len();
        let tx = self.conn.transaction()?;
        let mut counts = Vec::with_capacity(total);

        for (index, statement) in statements.iter().enumerate() {
            match tx.execute(&statement.sql, params_from_iter(statement.params.iter())) {
                Ok(rows) => {
                    tracing::debug!(index, rows, "executed statement: {}", statement.sql);
                    counts.push(rows);
                }
                Err(source) => {
                    tracing::warn!(index, total, "statement failed, rolling back: {source}");
                    // Dropping the transaction rolls it back.
                    drop(tx);
                    tracing::info!(total, "transaction rolled back");
                    return Err(StoreError::Transaction { index, total, source });
                }
            }
        }

        tx.commit()?;
        tracing::info!(total, rows = counts.iter().sum::<usize>(), "transaction committed");
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnrs_core::{fields, EntityId, EntityType};

    #[test]
    fn batch_commits_every_statement_in_order() -> Result<()> {
        let mut store = SqliteStore::open_in_memory()?;
        let counts = store.run_transaction(&[
            Statement::new(
                "INSERT INTO habitat(habitat_id, habitat) VALUES (?1, ?2)",
                vec![Value::Integer(1), Value::Text("Fen".to_string())],
            ),
            Statement::new(
                "UPDATE habitat SET habitat = ?1 WHERE habitat_id = ?2",
                vec![Value::Text("Lowland fen".to_string()), Value::Integer(1)],
            ),
        ])?;
        assert_eq!(counts, vec![1, 1]);

        let record = store.get_entity(EntityType::Habitat, &EntityId::Int(1))?;
        assert_eq!(record.fields.get("habitat").and_then(|v| v.as_text()), Some("Lowland fen"));
        Ok(())
    }

    #[test]
    fn failing_statement_rolls_back_earlier_ones() -> Result<()> {
        let mut store = SqliteStore::open_in_memory()?;
        store.create_entity(EntityType::Measure, None, &fields([("measure", "Pond creation")]))?;

        let err = store
            .run_transaction(&[
                Statement::new(
                    "UPDATE measure SET measure = ?1 WHERE measure_id = ?2",
                    vec![Value::Text("Changed".to_string()), Value::Integer(1)],
                ),
                Statement::new(
                    "INSERT INTO measure_has_type(measure_id, measure_type_id) VALUES (?1, ?2)",
                    vec![Value::Integer(1), Value::Integer(404)],
                ),
            ])
            .err();

        assert!(matches!(err, Some(StoreError::Transaction { index: 1, total: 2, .. })));
        assert!(err.is_some_and(|err| err.is_constraint_violation()));

        let record = store.get_entity(EntityType::Measure, &EntityId::Int(1))?;
        assert_eq!(record.fields.get("measure").and_then(|v| v.as_text()), Some("Pond creation"));
        Ok(())
    }

    #[test]
    fn empty_batch_is_a_no_op() -> Result<()> {
        let mut store = SqliteStore::open_in_memory()?;
        assert!(store.run_transaction(&[])?.is_empty());
        Ok(())
    }
}
