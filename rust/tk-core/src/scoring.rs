//! Area scoring (stones plus surrounded empty regions).

use crate::board::{Board, Cell, Color};

/// `(black, white)` area counts. Empty regions touching both colors (or
/// none) count for nobody.
pub fn area_counts(board: &Board) -> (u32, u32) {
    let area = board.area();
    let neighbors = &board.tables().neighbors;
    let mut counts = [0u32; 2];
    let mut seen = vec![false; area];
    let mut region = Vec::new();

    for p in 0..area {
        match board.cell(p) {
            Cell::Stone(c) => counts[c.index()] += 1,
            Cell::Vacant if !seen[p] => {
                region.clear();
                region.push(p);
                seen[p] = true;
                let mut borders = [false; 2];
                let mut i = 0;
                while i < region.len() {
                    let q = region[i];
                    i += 1;
                    for &n in &neighbors[q] {
                        let n = n as usize;
                        match board.cell(n) {
                            Cell::Stone(c) => borders[c.index()] = true,
                            Cell::Vacant if !seen[n] => {
                                seen[n] = true;
                                region.push(n);
                            }
                            Cell::Vacant => {}
                        }
                    }
                }
                match borders {
                    [true, false] => counts[0] += region.len() as u32,
                    [false, true] => counts[1] += region.len() as u32,
                    _ => {}
                }
            }
            Cell::Vacant => {}
        }
    }
    (counts[0], counts[1])
}

/// Black minus White, komi included.
pub fn margin(board: &Board) -> f32 {
    let (b, w) = area_counts(board);
    b as f32 - w as f32 - board.komi()
}

pub fn winner(board: &Board) -> Color {
    if margin(board) > 0.0 {
        Color::Black
    } else {
        Color::White
    }
}
