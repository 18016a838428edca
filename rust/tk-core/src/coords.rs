//! Move encoding and GTP-style coordinates.
//!
//! Points are numbered row-major from the lower-left corner:
//! `p = row * size + col`, so `A1` is point 0. Per-move arrays (cluster
//! totals, root statistics) are indexed by `Move::index(area)`, with pass
//! stored in the last slot.

use std::fmt;

use thiserror::Error;

/// Column letters, skipping `I` as GTP does.
const COLUMNS: &[u8; 25] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Move {
    Play(u16),
    Pass,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseMoveError {
    #[error("empty move string")]
    Empty,
    #[error("bad column in {0:?}")]
    BadColumn(String),
    #[error("bad row in {0:?}")]
    BadRow(String),
    #[error("{0:?} is outside a {1}x{1} board")]
    OutOfRange(String, usize),
}

impl Move {
    /// Slot of this move in a per-move array of length `area + 1`.
    #[inline]
    pub fn index(self, area: usize) -> usize {
        match self {
            Move::Play(p) => p as usize,
            Move::Pass => area,
        }
    }

    pub fn from_index(idx: usize, area: usize) -> Option<Move> {
        if idx < area {
            Some(Move::Play(idx as u16))
        } else if idx == area {
            Some(Move::Pass)
        } else {
            None
        }
    }

    pub fn point(self) -> Option<usize> {
        match self {
            Move::Play(p) => Some(p as usize),
            Move::Pass => None,
        }
    }

    pub fn is_pass(self) -> bool {
        matches!(self, Move::Pass)
    }

    /// Parse `"C3"`, `"c3"` or `"pass"` for a board of `size`.
    pub fn parse(s: &str, size: usize) -> Result<Move, ParseMoveError> {
        let t = s.trim();
        if t.is_empty() {
            return Err(ParseMoveError::Empty);
        }
        if t.eq_ignore_ascii_case("pass") {
            return Ok(Move::Pass);
        }
        let upper = t.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        let col = COLUMNS
            .iter()
            .position(|&c| c == bytes[0])
            .ok_or_else(|| ParseMoveError::BadColumn(t.to_string()))?;
        let row: usize = upper[1..]
            .parse()
            .map_err(|_| ParseMoveError::BadRow(t.to_string()))?;
        if row == 0 || row > size || col >= size {
            return Err(ParseMoveError::OutOfRange(t.to_string(), size));
        }
        Ok(Move::Play(((row - 1) * size + col) as u16))
    }

    /// Render for a board of `size` (`"C3"`, `"pass"`).
    pub fn to_gtp(self, size: usize) -> String {
        match self {
            Move::Pass => "pass".to_string(),
            Move::Play(p) => {
                let p = p as usize;
                let col = COLUMNS[p % size] as char;
                format!("{}{}", col, p / size + 1)
            }
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Move::Pass => write!(f, "pass"),
            Move::Play(p) => write!(f, "#{}", p),
        }
    }
}
