//! tk-wls: win/loss states.
//!
//! A state is a single byte standing for a `(wins, runs)` pair with
//! `runs <= end_scale`. States are numbered in ascending order of a one-sided
//! Agresti-Coull confidence bound, so comparing two byte values compares the
//! estimated success rates. Updating after a playout is one table lookup
//! (`WIN[s]` or `LOSS[s]`); once `runs` reaches `end_scale` the tables move
//! between saturated states instead of growing.

pub mod states;

pub use states::{WinLossStates, WlsError, DEFAULT_CONFIRMATION_K};

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
mod states_tests;
