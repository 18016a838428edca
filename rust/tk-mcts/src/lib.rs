//! tk-mcts: shared-tree Monte Carlo search for Go.
//!
//! The design uses:
//! - An arena of `OnceLock` node slots addressed by `NodeId`, plus a
//!   position-hash transposition index
//! - Atomic per-move counters (wins, runs, virtual loss, win/loss state) so
//!   many threads descend and backpropagate without a tree lock
//! - Pattern-table priors as a fading bias on the UCT score

pub mod arena;
pub mod node;
pub mod prior;
pub mod simulation;
pub mod tree;

pub use node::{MoveStats, NodeId, SearchNode, NO_CHILD};
pub use prior::{PatternPriors, PriorSource, UniformPriors};
pub use simulation::{PlayoutError, SimulationWorker};
pub use tree::{AppliedTotals, PathStep, SearchTree, TreeError, TreeParams};

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
mod simulation_tests;
