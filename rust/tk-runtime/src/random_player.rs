//! Baseline player: a uniform legal move that does not fill its own eye.

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use tk_core::{Board, Config, Move};

use crate::player::{illegal, parse_value, Player, PlayerError, SearchBudget, SearchReport};

pub struct RandomPlayer {
    board: Board,
    rng: ChaCha8Rng,
    choice: Option<Move>,
    pending: Option<SearchReport>,
}

impl RandomPlayer {
    pub fn new(config: &Config) -> Self {
        Self {
            board: Board::new(config.board.size, config.board.komi),
            rng: ChaCha8Rng::seed_from_u64(config.search.seed),
            choice: None,
            pending: None,
        }
    }

    fn pick(&mut self) -> SearchReport {
        let me = self.board.color_to_play();
        let candidates: Vec<Move> = self
            .board
            .legal_moves()
            .into_iter()
            .filter(|mv| match mv {
                Move::Play(p) => !self.board.is_eyelike(*p as usize, me),
                Move::Pass => false,
            })
            .collect();
        let mv = if self.board.game_over() {
            None
        } else {
            Some(candidates.choose(&mut self.rng).copied().unwrap_or(Move::Pass))
        };
        self.choice = mv;
        SearchReport {
            playouts: 0,
            illegal: 0,
            best: mv,
            root_playouts: u32::from(mv.is_some()),
            elapsed_ms: 0,
        }
    }
}

impl Player for RandomPlayer {
    fn name(&self) -> &str {
        "random"
    }

    fn board(&self) -> &Board {
        &self.board
    }

    fn reset(&mut self) -> Result<(), PlayerError> {
        self.board.clear();
        self.choice = None;
        self.pending = None;
        Ok(())
    }

    fn accept_move(&mut self, mv: Move) -> Result<(), PlayerError> {
        self.board
            .play(mv)
            .map_err(|source| illegal(&self.board, mv, source))?;
        self.choice = None;
        self.pending = None;
        Ok(())
    }

    fn set_komi(&mut self, komi: f32) -> Result<(), PlayerError> {
        self.board.set_komi(komi);
        Ok(())
    }

    fn set_property(&mut self, key: &str, value: &str) -> Result<(), PlayerError> {
        match key {
            "seed" => {
                self.rng = ChaCha8Rng::seed_from_u64(parse_value(key, value)?);
                Ok(())
            }
            _ => Err(PlayerError::UnknownProperty(key.to_string())),
        }
    }

    fn search(&mut self, _budget: SearchBudget) -> Result<SearchReport, PlayerError> {
        Ok(self.pick())
    }

    fn begin_search(&mut self, _budget: SearchBudget) -> Result<(), PlayerError> {
        self.pending = Some(self.pick());
        Ok(())
    }

    fn poll_search(&mut self) -> Option<SearchReport> {
        self.pending.take()
    }

    fn stop_search(&mut self) -> Option<SearchReport> {
        self.pending.take()
    }

    fn is_searching(&self) -> bool {
        false
    }

    fn best_move(&self) -> Option<Move> {
        self.choice
    }

    /// One run on the chosen move, no wins.
    fn root_totals(&self) -> (Vec<u32>, Vec<u32>) {
        let area = self.board.area();
        let mut runs = vec![0; area + 1];
        if let Some(mv) = self.choice {
            runs[mv.index(area)] = 1;
        }
        (runs, vec![0; area + 1])
    }

    fn apply_totals(&mut self, runs: &[u32], wins: &[u32]) -> Result<usize, PlayerError> {
        let expected = self.board.area() + 1;
        for got in [runs.len(), wins.len()] {
            if got != expected {
                return Err(tk_mcts::TreeError::LengthMismatch { expected, got }.into());
            }
        }
        Ok(0)
    }
}
