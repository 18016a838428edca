//! One playout at a time against the shared tree.

use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use thiserror::Error;
use tk_core::{Board, Color, IllegalMove, Move};
use tracing::warn;

use crate::prior::PatternPriors;
use crate::tree::{PathStep, SearchTree, TreeError};

#[derive(Debug, Error)]
pub enum PlayoutError {
    #[error("illegal move {mv} after {sequence:?}: {source}")]
    IllegalMove {
        mv: String,
        sequence: String,
        #[source]
        source: IllegalMove,
    },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Per-thread playout driver. Owns its scratch board and RNG; shares the
/// tree and the pattern table.
pub struct SimulationWorker {
    tree: Arc<SearchTree>,
    patterns: Arc<PatternPriors>,
    scratch: Board,
    rng: ChaCha8Rng,
    max_moves: usize,
    /// `(fingerprint, mover)` of every stone placed this playout.
    played: Vec<(u64, Color)>,
    vacant: Vec<usize>,
    playouts: u64,
}

impl SimulationWorker {
    pub fn new(
        tree: Arc<SearchTree>,
        patterns: Arc<PatternPriors>,
        board: &Board,
        seed: u64,
        index: usize,
    ) -> Self {
        let max_moves = tree.params().max_depth;
        let stream = seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            tree,
            patterns,
            scratch: board.clone(),
            rng: ChaCha8Rng::seed_from_u64(stream),
            max_moves,
            played: Vec::with_capacity(max_moves),
            vacant: Vec::with_capacity(board.area()),
            playouts: 0,
        }
    }

    pub fn playouts(&self) -> u64 {
        self.playouts
    }

    pub fn tree(&self) -> &Arc<SearchTree> {
        &self.tree
    }

    /// Descend, expand, roll out, score and record one playout from `board`.
    /// Returns the winner. On an illegal move nothing is recorded.
    pub fn run_one(&mut self, board: &Board) -> Result<Color, PlayoutError> {
        self.scratch.copy_from(board);
        self.played.clear();
        let start = self.scratch.turn();

        let path = match self.descend() {
            Ok(path) => path,
            Err(TreeError::IllegalMove { mv, source }) => {
                return Err(self.illegal(mv, source));
            }
            Err(e) => return Err(e.into()),
        };
        self.tree
            .expand(&path, &self.scratch, self.patterns.as_ref());

        while !self.scratch.game_over() && self.scratch.turn() - start < self.max_moves {
            let mv = self.pick_rollout_move();
            if let Err(source) = self.play_recorded(mv) {
                self.tree.abandon(&path);
                return Err(self.illegal(mv, source));
            }
        }

        let winner = self.scratch.score();
        self.tree.backpropagate(&path, winner);
        for &(fp, mover) in &self.played {
            self.patterns.record(fp, mover == winner);
        }
        self.playouts += 1;
        Ok(winner)
    }

    fn descend(&mut self) -> Result<Vec<PathStep>, TreeError> {
        let before = self.scratch.turn();
        // Fingerprints need the position before each move, so replay the
        // tree's moves from a copy taken at the root.
        let root = self.scratch.clone();
        let path = self.tree.descend(&mut self.scratch, self.patterns.as_ref())?;
        let mut replay = root;
        for &mv in &self.scratch.move_sequence()[before..] {
            if let Move::Play(p) = mv {
                let mover = replay.color_to_play();
                self.played
                    .push((self.patterns.fingerprint(&replay, p as usize, mover), mover));
            }
            // Already played once on the scratch board.
            let _ = replay.play(mv);
        }
        Ok(path)
    }

    fn play_recorded(&mut self, mv: Move) -> Result<(), IllegalMove> {
        if let Move::Play(p) = mv {
            let mover = self.scratch.color_to_play();
            let fp = self.patterns.fingerprint(&self.scratch, p as usize, mover);
            self.scratch.play(mv)?;
            self.played.push((fp, mover));
            Ok(())
        } else {
            self.scratch.play(mv)
        }
    }

    /// Capture an opponent chain in atari if possible, otherwise a uniform
    /// legal point that does not fill one of our own eyes, otherwise pass.
    fn pick_rollout_move(&mut self) -> Move {
        let captures = self.scratch.capture_points();
        if !captures.is_empty() {
            return Move::Play(captures[self.rng.gen_range(0..captures.len())]);
        }
        let me = self.scratch.color_to_play();
        self.vacant.clear();
        self.vacant.extend(self.scratch.vacant_points());
        // Random start, then a linear scan with wraparound.
        let n = self.vacant.len();
        if n > 0 {
            let start = self.rng.gen_range(0..n);
            for k in 0..n {
                let p = self.vacant[(start + k) % n];
                if !self.scratch.is_eyelike(p, me) && self.scratch.is_legal(Move::Play(p as u16)) {
                    return Move::Play(p as u16);
                }
            }
        }
        Move::Pass
    }

    fn illegal(&self, mv: Move, source: IllegalMove) -> PlayoutError {
        let size = self.scratch.size();
        let sequence = self.scratch.move_sequence_gtp();
        warn!(
            mv = %mv.to_gtp(size),
            moves = %sequence,
            error = %source,
            "illegal move in playout; discarded"
        );
        PlayoutError::IllegalMove {
            mv: mv.to_gtp(size),
            sequence,
            source,
        }
    }
}
