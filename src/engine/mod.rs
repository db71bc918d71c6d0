//! Client-side ordering engine.
//!
//! - `allocator` computes fractional positions and renumbering plans
//! - `model` holds one board's columns, swimlanes and cards
//! - `validator` admits or rejects a proposed move
//! - `coordinator` applies moves optimistically and rolls them back
//! - `batch` plans multi-card moves
//! - `presence` tracks who is editing which card
//! - `events` are the real-time messages the engine consumes
//! - `store` is the seam to the authoritative store

pub mod allocator;
pub mod batch;
pub mod coordinator;
pub mod events;
pub mod model;
pub mod presence;
pub mod store;
pub mod validator;

pub use batch::{BatchOrder, SelectionSet};
pub use coordinator::{
    AlwaysDecline, AlwaysProceed, BatchOutcome, CommitOutcome, MutationCoordinator, SyncSettings,
    WipContext, WipPolicy,
};
pub use events::{PresenceScope, RealtimeEvent};
pub use model::BoardModel;
pub use presence::PresenceMap;
pub use store::BoardStore;
pub use validator::{MoveDecision, MoveIntent, RejectReason};
