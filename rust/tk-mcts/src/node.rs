//! Per-position statistics, updated in place by many threads.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use tk_core::{Board, Color, Move};

use crate::prior::PriorSource;

pub type NodeId = u32;

/// `child` value of a move whose position has no node yet.
pub const NO_CHILD: NodeId = u32::MAX;

pub struct MoveStats {
    pub mv: Move,
    /// Pattern prior captured when the node was created.
    pub prior: f32,
    pub wins: AtomicU32,
    pub runs: AtomicU32,
    pub virtual_loss: AtomicU32,
    pub wls_state: AtomicU8,
    pub child: AtomicU32,
}

impl MoveStats {
    fn new(mv: Move, prior: f32) -> Self {
        Self {
            mv,
            prior,
            wins: AtomicU32::new(0),
            runs: AtomicU32::new(0),
            virtual_loss: AtomicU32::new(0),
            wls_state: AtomicU8::new(0),
            child: AtomicU32::new(NO_CHILD),
        }
    }

    /// `(wins, runs)`. Wins are read first; writers bump runs first, so the
    /// pair always satisfies `wins <= runs`.
    #[inline]
    pub fn counts(&self) -> (u32, u32) {
        let w = self.wins.load(Ordering::Acquire);
        let r = self.runs.load(Ordering::Acquire);
        (w, r)
    }

    #[inline]
    pub fn child(&self) -> Option<NodeId> {
        match self.child.load(Ordering::Acquire) {
            NO_CHILD => None,
            id => Some(id),
        }
    }

    pub fn win_rate(&self) -> f32 {
        let (w, r) = self.counts();
        if r == 0 {
            0.0
        } else {
            w as f32 / r as f32
        }
    }
}

pub struct SearchNode {
    pub hash: u64,
    pub to_play: Color,
    pub total_runs: AtomicU32,
    /// Legal moves at creation, point order, pass last.
    pub moves: Vec<MoveStats>,
}

impl SearchNode {
    pub fn new(board: &Board, priors: &dyn PriorSource) -> Self {
        let moves = board
            .legal_moves()
            .into_iter()
            .map(|mv| MoveStats::new(mv, priors.prior(board, mv)))
            .collect();
        Self {
            hash: board.hash(),
            to_play: board.color_to_play(),
            total_runs: AtomicU32::new(0),
            moves,
        }
    }

    pub fn total_runs(&self) -> u32 {
        self.total_runs.load(Ordering::Acquire)
    }

    /// Index of `mv` in `moves`.
    pub fn move_index(&self, mv: Move) -> Option<usize> {
        self.moves.binary_search_by(|m| m.mv.cmp(&mv)).ok()
    }

    /// Most runs; ties go to the higher win rate, then to move order.
    pub fn best_move_index(&self) -> Option<usize> {
        let mut best: Option<(usize, u32, f32)> = None;
        for (i, m) in self.moves.iter().enumerate() {
            let (w, r) = m.counts();
            let rate = if r == 0 { 0.0 } else { w as f32 / r as f32 };
            let better = match best {
                None => true,
                Some((_, br, brate)) => r > br || (r == br && rate > brate),
            };
            if better {
                best = Some((i, r, rate));
            }
        }
        best.map(|(i, _, _)| i)
    }
}
