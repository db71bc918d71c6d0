pub mod board;
pub mod board_config;
pub mod client;
pub mod engine;
pub mod errors;
pub mod telemetry;
