use serde::{Deserialize, Serialize};

use crate::board::models::{ActorId, Card, Column, ContainerRef};

/// Where a presence roster applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PresenceScope {
    Board { board_id: i64 },
    Container { container: ContainerRef },
}

/// Events the engine consumes from the real-time channel.
///
/// Presence events feed `PresenceMap::apply`; card and column events feed
/// `MutationCoordinator::apply_remote`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    CardMoved { card: Card },
    ColumnMoved { column: Column },
    ContainerRenumbered { container: ContainerRef, cards: Vec<Card> },
    ActorEditingStarted { card_id: i64, actor: ActorId },
    ActorEditingEnded { card_id: i64, actor: ActorId },
    ActorPresence { scope: PresenceScope, actors: Vec<ActorId> },
    ActorDisconnected { actor: ActorId },
}
