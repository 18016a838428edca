//! tk-core: Go board, move encoding and the shared YAML configuration.
//!
//! The board is the rules collaborator the search core is built against:
//! legality (simple ko, no suicide), captures, Zobrist hashing and area
//! scoring. It deliberately stays small; the interesting work lives in
//! `tk-mcts` and `tk-cluster`.

pub mod board;
pub mod config;
pub mod coords;
pub mod scoring;
pub mod zobrist;

pub use board::{Board, Cell, Color, IllegalMove, MAX_SIZE, MIN_SIZE};
pub use config::{Config, ConfigError, ValueMode};
pub use coords::{Move, ParseMoveError};
pub use zobrist::BoardTables;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");


#[cfg(test)]
mod scoring_tests;
