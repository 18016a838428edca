//! Radius-2 neighborhood fingerprints.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use tk_core::{Board, Cell, Color};

/// `(dc, dr)` offsets of the 12 points within Manhattan distance 2.
pub const NEIGHBORHOOD: [(isize, isize); 12] = [
    (0, 1),
    (1, 0),
    (0, -1),
    (-1, 0),
    (1, 1),
    (1, -1),
    (-1, -1),
    (-1, 1),
    (0, 2),
    (2, 0),
    (0, -2),
    (-2, 0),
];

const VACANT: usize = 0;
const MINE: usize = 1;
const THEIRS: usize = 2;
const OFF_BOARD: usize = 3;

/// Random keys per (offset, point class). Processes that share a pattern
/// table must build their hasher from the same seed.
#[derive(Debug, Clone)]
pub struct PatternHasher {
    keys: [[u64; 4]; NEIGHBORHOOD.len()],
}

impl PatternHasher {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut keys = [[0u64; 4]; NEIGHBORHOOD.len()];
        for row in keys.iter_mut() {
            for k in row.iter_mut() {
                *k = rng.gen();
            }
        }
        Self { keys }
    }

    /// Fingerprint of the shape around `p` as seen by the side to move.
    pub fn fingerprint(&self, board: &Board, p: usize) -> u64 {
        self.fingerprint_for(board, p, board.color_to_play())
    }

    pub fn fingerprint_for(&self, board: &Board, p: usize, mover: Color) -> u64 {
        let (c, r) = board.coords(p);
        let mut h = 0u64;
        for (i, &(dc, dr)) in NEIGHBORHOOD.iter().enumerate() {
            let class = match board.point_at(c + dc, r + dr) {
                None => OFF_BOARD,
                Some(q) => match board.cell(q) {
                    Cell::Vacant => VACANT,
                    Cell::Stone(s) if s == mover => MINE,
                    Cell::Stone(_) => THEIRS,
                },
            };
            h ^= self.keys[i][class];
        }
        h
    }
}
