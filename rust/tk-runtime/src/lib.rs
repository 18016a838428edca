//! Players: the board a search runs from, the search threads, and the
//! string-keyed registry the cluster worker builds its player from.

pub mod mcts_player;
pub mod player;
pub mod random_player;
pub mod registry;

pub use mcts_player::MctsPlayer;
pub use player::{Player, PlayerError, SearchBudget, SearchReport};
pub use random_player::RandomPlayer;
pub use registry::{PlayerFactory, PlayerRegistry};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}

#[cfg(test)]
mod runtime_tests;
