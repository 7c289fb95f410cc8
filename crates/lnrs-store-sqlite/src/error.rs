use std::path::PathBuf;

use lnrs_core::{CoreError, EntityId, EntityType};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to open database at '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A statement of an atomic batch failed; nothing from the batch is visible.
    #[error("transaction rolled back at statement {index} of {total}: {source}")]
    Transaction {
        index: usize,
        total: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// A cascade step failed. Steps before `step` stay committed and the parent row is kept.
    #[error(
        "cascade delete of {entity_type} {entity_id} failed at step {step}/{total_steps} ({table}) \
         after removing {removed_before} dependent rows: {source}"
    )]
    CascadeStep {
        entity_type: EntityType,
        entity_id: EntityId,
        step: usize,
        total_steps: usize,
        table: &'static str,
        removed_before: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: EntityType, id: EntityId },

    #[error("{entity_type} {id} already exists")]
    Duplicate { entity_type: EntityType, id: EntityId },

    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("schema error: {0}")]
    Schema(String),
}

impl StoreError {
    /// True when the underlying engine rejected a statement on a constraint.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        let source = match self {
            Self::Sqlite(source)
            | Self::Open { source, .. }
            | Self::Transaction { source, .. }
            | Self::CascadeStep { source, .. } => source,
            _ => return false,
        };
        matches!(
            source,
            rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
