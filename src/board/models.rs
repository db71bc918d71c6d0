use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::allocator::Positioned;

/// Opaque identifier of an acting user, supplied by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: i64,
    pub board_id: i64,
    pub name: String,
    pub position: f64,
    /// Advisory capacity. `None` means unlimited.
    pub wip_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swimlane {
    pub id: i64,
    pub board_id: i64,
    pub name: String,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub board_id: i64,
    pub column_id: i64,
    pub lane_id: Option<i64>,
    pub title: String,
    pub position: f64,
    pub archived: bool,
    pub updated_at: String,
}

impl Card {
    pub fn container(&self) -> ContainerRef {
        ContainerRef::new(self.column_id, self.lane_id)
    }

    /// True when the card already sits at `position` inside `container`.
    pub fn is_at(&self, container: ContainerRef, position: f64) -> bool {
        self.container() == container && self.position == position
    }
}

/// An ordered collection of cards: a column, or a column × swimlane cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerRef {
    pub column_id: i64,
    pub lane_id: Option<i64>,
}

impl ContainerRef {
    pub fn new(column_id: i64, lane_id: Option<i64>) -> Self {
        Self { column_id, lane_id }
    }

    pub fn column(column_id: i64) -> Self {
        Self::new(column_id, None)
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lane_id {
            Some(lane) => write!(f, "column {} / lane {}", self.column_id, lane),
            None => write!(f, "column {}", self.column_id),
        }
    }
}

impl Positioned for Card {
    fn entity_id(&self) -> i64 {
        self.id
    }

    fn position(&self) -> f64 {
        self.position
    }
}

impl Positioned for Column {
    fn entity_id(&self) -> i64 {
        self.id
    }

    fn position(&self) -> f64 {
        self.position
    }
}

impl Positioned for Swimlane {
    fn entity_id(&self) -> i64 {
        self.id
    }

    fn position(&self) -> f64 {
        self.position
    }
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub board: Board,
    pub lanes: Vec<Swimlane>,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    pub column: Column,
    /// Non-archived cards across all lanes of the column.
    pub occupancy: usize,
    pub wip_exceeded: bool,
    pub cards: Vec<Card>,
}
