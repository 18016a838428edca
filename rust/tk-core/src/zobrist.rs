//! Per-size lookup tables: neighbor lists and Zobrist keys.
//!
//! Built once per board size by `BoardTables::new` and shared between board
//! copies through an `Arc`. Keys come from a fixed-seed ChaCha8 stream, so
//! two boards of the same size always hash identical positions identically
//! (which is what lets separate processes agree on position hashes).

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;

const ZOBRIST_SEED: u64 = 0x7E4A_C0DE_5EED_0001;

#[derive(Debug)]
pub struct BoardTables {
    pub size: usize,
    pub area: usize,
    /// Orthogonal neighbors of each point (2..=4 entries).
    pub neighbors: Vec<Vec<u16>>,
    /// Diagonal neighbors of each point (1..=4 entries).
    pub diagonals: Vec<Vec<u16>>,
    /// `stone_keys[color][point]`.
    pub stone_keys: [Vec<u64>; 2],
    pub ko_keys: Vec<u64>,
    pub white_to_play_key: u64,
    /// Keyed by consecutive passes; zero passes hashes to 0.
    pub pass_keys: [u64; 3],
}

impl BoardTables {
    pub fn new(size: usize) -> Self {
        let area = size * size;
        let mut neighbors = Vec::with_capacity(area);
        let mut diagonals = Vec::with_capacity(area);
        for p in 0..area {
            let (c, r) = ((p % size) as isize, (p / size) as isize);
            let at = |dc: isize, dr: isize| -> Option<u16> {
                let (nc, nr) = (c + dc, r + dr);
                if nc < 0 || nr < 0 || nc >= size as isize || nr >= size as isize {
                    None
                } else {
                    Some((nr as usize * size + nc as usize) as u16)
                }
            };
            neighbors.push(
                [(0, 1), (1, 0), (0, -1), (-1, 0)]
                    .iter()
                    .filter_map(|&(dc, dr)| at(dc, dr))
                    .collect(),
            );
            diagonals.push(
                [(1, 1), (1, -1), (-1, -1), (-1, 1)]
                    .iter()
                    .filter_map(|&(dc, dr)| at(dc, dr))
                    .collect(),
            );
        }

        let mut rng = ChaCha8Rng::seed_from_u64(ZOBRIST_SEED ^ size as u64);
        let black: Vec<u64> = (0..area).map(|_| rng.gen()).collect();
        let white: Vec<u64> = (0..area).map(|_| rng.gen()).collect();
        let ko_keys: Vec<u64> = (0..area).map(|_| rng.gen()).collect();
        let white_to_play_key = rng.gen();
        let pass_keys = [0, rng.gen(), rng.gen()];

        Self {
            size,
            area,
            neighbors,
            diagonals,
            stone_keys: [black, white],
            ko_keys,
            white_to_play_key,
            pass_keys,
        }
    }

    /// Point at column `c`, row `r`, or `None` off the board.
    #[inline]
    pub fn point_at(&self, c: isize, r: isize) -> Option<usize> {
        if c < 0 || r < 0 || c >= self.size as isize || r >= self.size as isize {
            None
        } else {
            Some(r as usize * self.size + c as usize)
        }
    }

    /// `(column, row)` of a point.
    #[inline]
    pub fn coords(&self, p: usize) -> (isize, isize) {
        ((p % self.size) as isize, (p / self.size) as isize)
    }
}
