//! Go board: stone placement, captures, simple ko, pass handling.
//!
//! Chains are walked by flood fill over point indices; no chain objects are
//! kept between moves. The board is cheap to copy (`Clone`, `copy_from`), and
//! the static per-size tables are shared through an `Arc`.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::coords::Move;
use crate::scoring;
use crate::zobrist::BoardTables;

pub const MIN_SIZE: usize = 2;
pub const MAX_SIZE: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    White,
}

impl Color {
    #[inline]
    pub fn opposite(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Color::Black => 0,
            Color::White => 1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Black => write!(f, "black"),
            Color::White => write!(f, "white"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cell {
    Vacant,
    Stone(Color),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IllegalMove {
    #[error("point {0} is off the board")]
    OffBoard(u16),
    #[error("point {0} is occupied")]
    Occupied(u16),
    #[error("point {0} is a ko recapture")]
    Ko(u16),
    #[error("point {0} is suicide")]
    Suicide(u16),
    #[error("game is over")]
    GameOver,
}

#[derive(Clone)]
pub struct Board {
    tables: Arc<BoardTables>,
    cells: Vec<Cell>,
    to_play: Color,
    komi: f32,
    ko: Option<u16>,
    passes: u8,
    hash: u64,
    history: Vec<Move>,
}

impl Board {
    /// Empty board. `size` must be in `MIN_SIZE..=MAX_SIZE` (checked by config
    /// validation; out-of-range sizes are clamped here).
    pub fn new(size: usize, komi: f32) -> Self {
        let size = size.clamp(MIN_SIZE, MAX_SIZE);
        Self::with_tables(Arc::new(BoardTables::new(size)), komi)
    }

    pub fn with_tables(tables: Arc<BoardTables>, komi: f32) -> Self {
        let area = tables.area;
        Self {
            tables,
            cells: vec![Cell::Vacant; area],
            to_play: Color::Black,
            komi,
            ko: None,
            passes: 0,
            hash: 0,
            history: Vec::with_capacity(area * 2),
        }
    }

    /// Overwrite `self` with `src`, reusing allocations.
    pub fn copy_from(&mut self, src: &Board) {
        if !Arc::ptr_eq(&self.tables, &src.tables) {
            self.tables = Arc::clone(&src.tables);
        }
        self.cells.clone_from(&src.cells);
        self.history.clone_from(&src.history);
        self.to_play = src.to_play;
        self.komi = src.komi;
        self.ko = src.ko;
        self.passes = src.passes;
        self.hash = src.hash;
    }

    /// Back to the empty position. Komi is kept.
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = Cell::Vacant);
        self.history.clear();
        self.to_play = Color::Black;
        self.ko = None;
        self.passes = 0;
        self.hash = 0;
    }

    pub fn tables(&self) -> &Arc<BoardTables> {
        &self.tables
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.tables.size
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.tables.area
    }

    pub fn komi(&self) -> f32 {
        self.komi
    }

    pub fn set_komi(&mut self, komi: f32) {
        self.komi = komi;
    }

    #[inline]
    pub fn color_to_play(&self) -> Color {
        self.to_play
    }

    /// Zobrist hash of stones, side to move, ko point and pending passes.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn cell(&self, p: usize) -> Cell {
        self.cells[p]
    }

    /// Number of moves played so far.
    pub fn turn(&self) -> usize {
        self.history.len()
    }

    pub fn move_sequence(&self) -> &[Move] {
        &self.history
    }

    /// Move sequence rendered as space-separated GTP coordinates.
    pub fn move_sequence_gtp(&self) -> String {
        let size = self.size();
        self.history
            .iter()
            .map(|m| m.to_gtp(size))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn ko_point(&self) -> Option<u16> {
        self.ko
    }

    /// Two consecutive passes end the game.
    #[inline]
    pub fn game_over(&self) -> bool {
        self.passes >= 2
    }

    pub fn point_at(&self, c: isize, r: isize) -> Option<usize> {
        self.tables.point_at(c, r)
    }

    pub fn coords(&self, p: usize) -> (isize, isize) {
        self.tables.coords(p)
    }

    pub fn vacant_points(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Cell::Vacant)
            .map(|(p, _)| p)
    }

    /// Legal vacant points in point order, then pass. Empty once the game is over.
    pub fn legal_moves(&self) -> Vec<Move> {
        if self.game_over() {
            return Vec::new();
        }
        let mut out: Vec<Move> = self
            .vacant_points()
            .map(|p| Move::Play(p as u16))
            .filter(|&m| self.is_legal(m))
            .collect();
        out.push(Move::Pass);
        out
    }

    pub fn is_legal(&self, mv: Move) -> bool {
        self.check(mv).is_ok()
    }

    fn check(&self, mv: Move) -> Result<(), IllegalMove> {
        if self.game_over() {
            return Err(IllegalMove::GameOver);
        }
        let p = match mv {
            Move::Pass => return Ok(()),
            Move::Play(p) => p,
        };
        let pu = p as usize;
        if pu >= self.area() {
            return Err(IllegalMove::OffBoard(p));
        }
        if self.cells[pu] != Cell::Vacant {
            return Err(IllegalMove::Occupied(p));
        }
        if self.ko == Some(p) {
            return Err(IllegalMove::Ko(p));
        }
        let me = self.to_play;
        for &n in &self.tables.neighbors[pu] {
            let n = n as usize;
            match self.cells[n] {
                Cell::Vacant => return Ok(()),
                // p is one of the chain's liberties; any other keeps us alive.
                Cell::Stone(c) if c == me => {
                    if self.liberty_count(n) > 1 {
                        return Ok(());
                    }
                }
                Cell::Stone(_) => {
                    if self.liberty_count(n) == 1 {
                        return Ok(());
                    }
                }
            }
        }
        Err(IllegalMove::Suicide(p))
    }

    pub fn play(&mut self, mv: Move) -> Result<(), IllegalMove> {
        self.check(mv)?;
        let me = self.to_play;
        let old_ko = self.ko.take();
        if let Some(k) = old_ko {
            self.hash ^= self.tables.ko_keys[k as usize];
        }

        let old_passes = self.passes as usize;
        match mv {
            Move::Pass => {
                self.passes += 1;
                self.hash ^=
                    self.tables.pass_keys[old_passes] ^ self.tables.pass_keys[old_passes + 1];
            }
            Move::Play(p) => {
                let pu = p as usize;
                self.hash ^= self.tables.pass_keys[old_passes];
                self.passes = 0;
                self.put(pu, me);

                let mut captured = 0usize;
                let mut last_captured = 0usize;
                let tables = Arc::clone(&self.tables);
                for &n in &tables.neighbors[pu] {
                    let n = n as usize;
                    if self.cells[n] == Cell::Stone(me.opposite()) && self.liberty_count(n) == 0 {
                        let stones = self.chain(n);
                        captured += stones.len();
                        last_captured = n;
                        for s in stones {
                            self.remove(s);
                        }
                    }
                }

                if captured == 1 {
                    let single = tables.neighbors[pu]
                        .iter()
                        .all(|&n| self.cells[n as usize] != Cell::Stone(me));
                    if single && self.liberty_count(pu) == 1 {
                        self.ko = Some(last_captured as u16);
                        self.hash ^= tables.ko_keys[last_captured];
                    }
                }
            }
        }

        self.to_play = me.opposite();
        self.hash ^= self.tables.white_to_play_key;
        self.history.push(mv);
        Ok(())
    }

    /// Winner under area scoring with komi. A tie goes to White.
    pub fn score(&self) -> Color {
        scoring::winner(self)
    }

    /// True when `p` is vacant, every orthogonal neighbor is `color`, and the
    /// diagonals are not controlled by the opponent.
    pub fn is_eyelike(&self, p: usize, color: Color) -> bool {
        if self.cells[p] != Cell::Vacant {
            return false;
        }
        if self.tables.neighbors[p]
            .iter()
            .any(|&n| self.cells[n as usize] != Cell::Stone(color))
        {
            return false;
        }
        let diags = &self.tables.diagonals[p];
        let hostile = diags
            .iter()
            .filter(|&&d| self.cells[d as usize] == Cell::Stone(color.opposite()))
            .count();
        if diags.len() < 4 {
            hostile == 0
        } else {
            hostile < 2
        }
    }

    /// Legal points that capture an opponent chain in atari.
    pub fn capture_points(&self) -> Vec<u16> {
        let opp = Cell::Stone(self.to_play.opposite());
        let mut seen = vec![false; self.area()];
        let mut out = Vec::new();
        for p in 0..self.area() {
            if self.cells[p] != opp || seen[p] {
                continue;
            }
            let (stones, libs) = self.chain_and_liberties(p);
            for s in stones {
                seen[s] = true;
            }
            if let [lib] = libs[..] {
                let lib = lib as u16;
                if !out.contains(&lib) && self.is_legal(Move::Play(lib)) {
                    out.push(lib);
                }
            }
        }
        out
    }

    /// Stones of the chain containing `p`.
    pub fn chain(&self, p: usize) -> Vec<usize> {
        self.chain_and_liberties(p).0
    }

    pub fn liberty_count(&self, p: usize) -> usize {
        self.chain_and_liberties(p).1.len()
    }

    fn chain_and_liberties(&self, p: usize) -> (Vec<usize>, Vec<usize>) {
        let color = self.cells[p];
        let mut stones = vec![p];
        let mut libs = Vec::new();
        let mut mark = vec![false; self.area()];
        mark[p] = true;
        let mut i = 0;
        while i < stones.len() {
            let s = stones[i];
            i += 1;
            for &n in &self.tables.neighbors[s] {
                let n = n as usize;
                if mark[n] {
                    continue;
                }
                let c = self.cells[n];
                if c == color {
                    mark[n] = true;
                    stones.push(n);
                } else if c == Cell::Vacant {
                    mark[n] = true;
                    libs.push(n);
                }
            }
        }
        (stones, libs)
    }

    fn put(&mut self, p: usize, color: Color) {
        self.cells[p] = Cell::Stone(color);
        self.hash ^= self.tables.stone_keys[color.index()][p];
    }

    fn remove(&mut self, p: usize) {
        if let Cell::Stone(color) = self.cells[p] {
            self.hash ^= self.tables.stone_keys[color.index()][p];
            self.cells[p] = Cell::Vacant;
        }
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("size", &self.size())
            .field("to_play", &self.to_play)
            .field("komi", &self.komi)
            .field("turn", &self.turn())
            .field("hash", &format_args!("{:#018x}", self.hash))
            .finish()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.size();
        for r in (0..size).rev() {
            for c in 0..size {
                let ch = match self.cells[r * size + c] {
                    Cell::Vacant => '.',
                    Cell::Stone(Color::Black) => '#',
                    Cell::Stone(Color::White) => 'O',
                };
                write!(f, "{}", ch)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
