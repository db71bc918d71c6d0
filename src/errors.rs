//! Typed error hierarchy for corkboard.
//!
//! Two top-level enums cover the two subsystems:
//! - `BoardError`: authoritative store and API failures
//! - `EngineError`: client-side ordering engine failures that are not
//!   ordinary move rejections (those are returned as values, see
//!   `engine::validator::RejectReason`)

use thiserror::Error;

use crate::board::models::ContainerRef;

/// Errors from the board store and API subsystem.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Board {id} not found")]
    BoardNotFound { id: i64 },

    #[error("Column {id} not found")]
    ColumnNotFound { id: i64 },

    #[error("Swimlane {id} not found")]
    LaneNotFound { id: i64 },

    #[error("Card {id} not found")]
    CardNotFound { id: i64 },

    #[error("Column {column_id} does not belong to board {board_id}")]
    CrossBoardMove { board_id: i64, column_id: i64 },

    #[error("Invalid WIP limit {limit}: must be at least 1")]
    InvalidWipLimit { limit: u32 },

    #[error("Position {position} is not a finite number")]
    InvalidPosition { position: f64 },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    /// True for the variants that mean "the referenced row does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BoardError::BoardNotFound { .. }
                | BoardError::ColumnNotFound { .. }
                | BoardError::LaneNotFound { .. }
                | BoardError::CardNotFound { .. }
        )
    }
}

/// Errors from the client-side ordering engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Local board model lock poisoned")]
    LockPoisoned,

    #[error("Container {container} cannot hold {count} more cards without renumbering")]
    PrecisionExhausted { container: ContainerRef, count: usize },

    #[error("Renumber of {container} failed: {source}")]
    RenumberFailed {
        container: ContainerRef,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
