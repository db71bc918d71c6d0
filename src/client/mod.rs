//! Client side of the board service: the REST-backed `BoardStore` a
//! `MutationCoordinator` commits through, and decoding of the server's
//! real-time frames.

pub mod http_store;

pub use http_store::{HttpBoardStore, parse_event};
