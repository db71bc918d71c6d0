//! Board server: the authoritative store behind the ordering engine.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ (engine) │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ DbHandle::call()                       │
//!                       │         v                                        │
//!                       │  db.rs  (BoardDb, SQLite, last write wins)       │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! | Module   | Responsibility                                              |
//! |----------|-------------------------------------------------------------|
//! | `models` | Shared types: `Board`, `Column`, `Swimlane`, `Card`         |
//! | `db`     | SQLite access via `DbHandle`; implements `BoardStore`       |
//! | `ws`     | `WsMessage` broadcast enum, presence over the socket        |
//!
//! ## Typical request flow (drag a card)
//!
//! 1. The client's `MutationCoordinator` applies the move locally and calls
//!    `PATCH /api/cards/{id}/move` with the position it allocated.
//! 2. `api::move_card` stores the position as given and broadcasts
//!    `CardMoved` to every socket.
//! 3. If the destination's spacing collapsed, a background task renumbers
//!    it and broadcasts `ContainerRenumbered`.

pub mod api;
pub mod db;
pub mod models;
pub mod server;
pub mod ws;
