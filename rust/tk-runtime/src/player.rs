use std::str::FromStr;

use thiserror::Error;
use tk_core::{Board, IllegalMove, Move};
use tk_mcts::TreeError;
use tk_patterns::PatternError;
use tk_wls::WlsError;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("unknown property {0:?}")]
    UnknownProperty(String),
    #[error("invalid value {value:?} for property {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("illegal move {mv}: {source}")]
    IllegalMove {
        mv: String,
        #[source]
        source: IllegalMove,
    },
    #[error("a search is running")]
    Busy,
    #[error("unknown player {0:?}")]
    UnknownPlayer(String),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Wls(#[from] WlsError),
    #[error(transparent)]
    Patterns(#[from] PatternError),
}

/// How long a search runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBudget {
    Playouts(u64),
    Millis(u64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchReport {
    /// Playouts that reached backpropagation.
    pub playouts: u64,
    /// Playouts discarded after an illegal move.
    pub illegal: u64,
    pub best: Option<Move>,
    /// Playouts through the root after the search, including earlier searches
    /// and merged cluster totals.
    pub root_playouts: u32,
    pub elapsed_ms: u64,
}

/// A move generator driven by the cluster worker (or a test).
///
/// Searches never touch the network. `begin_search` returns immediately;
/// `root_totals` may be read while it runs.
pub trait Player: Send {
    fn name(&self) -> &str;

    fn board(&self) -> &Board;

    /// Start a new game on an empty board, keeping komi and properties.
    fn reset(&mut self) -> Result<(), PlayerError>;

    /// Play `mv` for the side to move. Stops a running search first.
    fn accept_move(&mut self, mv: Move) -> Result<(), PlayerError>;

    fn set_komi(&mut self, komi: f32) -> Result<(), PlayerError>;

    fn set_property(&mut self, key: &str, value: &str) -> Result<(), PlayerError>;

    /// Search to completion on the calling thread.
    fn search(&mut self, budget: SearchBudget) -> Result<SearchReport, PlayerError>;

    /// Start a search in the background.
    fn begin_search(&mut self, budget: SearchBudget) -> Result<(), PlayerError>;

    /// Take the report of a background search if it has finished.
    fn poll_search(&mut self) -> Option<SearchReport>;

    /// Stop a background search and wait for it.
    fn stop_search(&mut self) -> Option<SearchReport>;

    fn is_searching(&self) -> bool;

    fn best_move(&self) -> Option<Move>;

    /// Cumulative per-move `(runs, wins)` from this player's own playouts at
    /// the current position, indexed by `Move::index(area)`. Counts received
    /// through `apply_totals` are not included.
    fn root_totals(&self) -> (Vec<u32>, Vec<u32>);

    /// Merge cluster-wide totals into the current position's statistics.
    /// Returns how many moves changed.
    fn apply_totals(&mut self, runs: &[u32], wins: &[u32]) -> Result<usize, PlayerError>;
}

pub(crate) fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, PlayerError> {
    value.trim().parse().map_err(|_| PlayerError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

pub(crate) fn illegal(board: &Board, mv: Move, source: IllegalMove) -> PlayerError {
    PlayerError::IllegalMove {
        mv: mv.to_gtp(board.size()),
        source,
    }
}
