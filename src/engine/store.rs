use anyhow::Result;
use async_trait::async_trait;

use crate::board::models::{Card, Column, ContainerRef};

/// The authoritative store as the engine sees it.
///
/// Positions sent here may later be superseded by a renumber pass, so
/// implementations must not treat them as stable identifiers.
/// Real implementations: `DbHandle` (in-process) and
/// `client::HttpBoardStore`.
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Persist a card move and return the store's canonical card.
    async fn move_item(&self, card_id: i64, container: ContainerRef, position: f64)
    -> Result<Card>;

    /// Persist a column reorder and return the canonical column.
    async fn move_container(&self, column_id: i64, position: f64) -> Result<Column>;

    /// Respace every card of `container` and return them in order.
    async fn renumber_container(&self, container: ContainerRef) -> Result<Vec<Card>>;
}
