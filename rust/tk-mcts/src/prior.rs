//! Move priors captured when a node is created.

use std::sync::Arc;

use tk_core::{Board, Color, Move};
use tk_patterns::{PatternHasher, PatternValueTable};

/// Prior win rate in `[0, 1]` for `mv` played by the side to move on `board`.
pub trait PriorSource: Sync {
    fn prior(&self, board: &Board, mv: Move) -> f32;
}

/// Every point at 0.5, pass at 0 (baseline stub).
pub struct UniformPriors;

impl PriorSource for UniformPriors {
    fn prior(&self, _board: &Board, mv: Move) -> f32 {
        if mv.is_pass() {
            0.0
        } else {
            0.5
        }
    }
}

/// Priors from the shared pattern table; also the sink for playout results.
#[derive(Debug, Clone)]
pub struct PatternPriors {
    hasher: PatternHasher,
    table: Arc<PatternValueTable>,
}

impl PatternPriors {
    pub fn new(hasher: PatternHasher, table: Arc<PatternValueTable>) -> Self {
        Self { hasher, table }
    }

    pub fn table(&self) -> &Arc<PatternValueTable> {
        &self.table
    }

    /// Fingerprint of `p` as seen by `mover`.
    #[inline]
    pub fn fingerprint(&self, board: &Board, p: usize, mover: Color) -> u64 {
        self.hasher.fingerprint_for(board, p, mover)
    }

    pub fn record(&self, fp: u64, won: bool) {
        self.table.update(fp, won);
    }
}

impl PriorSource for PatternPriors {
    fn prior(&self, board: &Board, mv: Move) -> f32 {
        match mv {
            Move::Pass => 0.0,
            Move::Play(p) => self.table.lookup(self.hasher.fingerprint(board, p as usize)),
        }
    }
}
