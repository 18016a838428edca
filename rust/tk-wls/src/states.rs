//! Table construction and lookups.

use thiserror::Error;
use tk_core::config::WlsConfig;

/// Upper quartile of N(0,1); the bound is one-sided at 75%.
const Z_UPPER_QUARTILE: f64 = 0.674490;
/// Score of the never-seen state, below every real bound.
const UNSEEN_SCORE: f64 = -9.9999;
/// Confirmation heuristic scale, tuned for `end_scale = 21`.
pub const DEFAULT_CONFIRMATION_K: f64 = 1.3;
/// Largest `end_scale` whose state count fits in a byte.
pub const MAX_END_SCALE: u32 = 21;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WlsError {
    #[error("end_scale must be in 1..={MAX_END_SCALE}, got {0}")]
    InvalidEndScale(u32),
    #[error("invalid prior: {wins} wins out of {visits} visits")]
    InvalidPrior { wins: u32, visits: u32 },
    #[error("confirmation_k must be finite and > 0, got {0}")]
    InvalidConfirmationK(f64),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    wins: u8,
    runs: u8,
    score: f64,
}

/// Immutable WIN/LOSS transition tables for one `end_scale`.
#[derive(Debug, Clone)]
pub struct WinLossStates {
    end_scale: u32,
    best_state: u8,
    threshold_half: u8,
    /// `(wins, runs)` of each state, in state order.
    entries: Vec<(u8, u8)>,
    win: Vec<u8>,
    loss: Vec<u8>,
}

impl WinLossStates {
    /// Build tables with the default confirmation scale.
    ///
    /// `ini_wins / ini_visits` is a virtual prior applied to state 0: a first
    /// win moves to `(ini_wins + 1, ini_visits + 1)`, a first loss to
    /// `(ini_wins, ini_visits + 1)`. `(0, 0)` is the usual choice.
    pub fn build(end_scale: u32, ini_wins: u32, ini_visits: u32) -> Result<Self, WlsError> {
        Self::build_with_k(end_scale, ini_wins, ini_visits, DEFAULT_CONFIRMATION_K)
    }

    pub fn from_config(cfg: &WlsConfig) -> Result<Self, WlsError> {
        Self::build_with_k(cfg.end_scale, cfg.ini_wins, cfg.ini_visits, cfg.confirmation_k)
    }

    pub fn build_with_k(
        end_scale: u32,
        ini_wins: u32,
        ini_visits: u32,
        k: f64,
    ) -> Result<Self, WlsError> {
        if !(1..=MAX_END_SCALE).contains(&end_scale) {
            return Err(WlsError::InvalidEndScale(end_scale));
        }
        if ini_wins > ini_visits {
            return Err(WlsError::InvalidPrior {
                wins: ini_wins,
                visits: ini_visits,
            });
        }
        if !(k.is_finite() && k > 0.0) {
            return Err(WlsError::InvalidConfirmationK(k));
        }

        let mut entries = Vec::with_capacity(((end_scale + 1) * (end_scale + 2) / 2) as usize);
        for runs in 0..=end_scale {
            for wins in 0..=runs {
                let score = if runs == 0 {
                    UNSEEN_SCORE
                } else if wins as f64 / runs as f64 > 0.4999 {
                    agresti_coull_lower(wins, runs)
                } else {
                    -1.0 + agresti_coull_upper(wins, runs)
                };
                entries.push(Entry {
                    wins: wins as u8,
                    runs: runs as u8,
                    score,
                });
            }
        }
        entries.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then(a.runs.cmp(&b.runs))
                .then(a.wins.cmp(&b.wins))
        });

        let builder = Builder {
            entries: &entries,
            end_scale,
            k,
        };
        let n = entries.len();
        let best = n - 1;
        let mut win = vec![0u8; n];
        let mut loss = vec![0u8; n];

        win[0] = builder
            .find(ini_wins + 1, ini_visits + 1)
            .or_else(|| builder.find(1, 1))
            .unwrap_or(best) as u8;
        loss[0] = builder
            .find(ini_wins, ini_visits + 1)
            .or_else(|| builder.find(0, 1))
            .unwrap_or(1) as u8;

        for s in 1..n {
            let (w, r) = (entries[s].wins as u32, entries[s].runs as u32);
            win[s] = builder
                .find(w + 1, r + 1)
                .unwrap_or_else(|| builder.saturated(s, true)) as u8;
            loss[s] = builder
                .find(w, r + 1)
                .unwrap_or_else(|| builder.saturated(s, false)) as u8;
        }

        let threshold_half = if end_scale >= 2 {
            builder.find(1, 2)
        } else {
            builder.find(0, 1)
        }
        .unwrap_or(0) as u8;

        Ok(Self {
            end_scale,
            best_state: best as u8,
            threshold_half,
            entries: entries.iter().map(|e| (e.wins, e.runs)).collect(),
            win,
            loss,
        })
    }

    /// Next state after one playout.
    #[inline]
    pub fn update(&self, state: u8, won: bool) -> u8 {
        if won {
            self.win[state as usize]
        } else {
            self.loss[state as usize]
        }
    }

    pub fn wins_runs(&self, state: u8) -> (u32, u32) {
        let (w, r) = self.entries[state as usize];
        (w as u32, r as u32)
    }

    /// `wins / runs` of the state; 0.5 for the never-seen state.
    pub fn win_rate(&self, state: u8) -> f32 {
        let (w, r) = self.entries[state as usize];
        if r == 0 {
            0.5
        } else {
            w as f32 / r as f32
        }
    }

    /// Strictly better than one win in two runs.
    #[inline]
    pub fn is_above_half(&self, state: u8) -> bool {
        state > self.threshold_half
    }

    /// State of `(wins, runs)`, if representable.
    pub fn state_of(&self, wins: u32, runs: u32) -> Option<u8> {
        self.entries
            .iter()
            .rposition(|&(w, r)| w as u32 == wins && r as u32 == runs)
            .map(|s| s as u8)
    }

    /// State closest to `wins / runs`. Counts beyond the end of scale are
    /// rescaled to `end_scale` runs first.
    pub fn nearest_state(&self, wins: u32, runs: u32) -> u8 {
        let wins = wins.min(runs);
        let (w, r) = if runs <= self.end_scale {
            (wins, runs)
        } else {
            let e = self.end_scale as u64;
            let w = (wins as u64 * e + runs as u64 / 2) / runs as u64;
            (w as u32, self.end_scale)
        };
        self.state_of(w, r).unwrap_or(0)
    }

    pub fn best_state(&self) -> u8 {
        self.best_state
    }

    pub fn threshold_half(&self) -> u8 {
        self.threshold_half
    }

    pub fn end_scale(&self) -> u32 {
        self.end_scale
    }

    pub fn num_states(&self) -> usize {
        self.entries.len()
    }

    pub fn win_table(&self) -> &[u8] {
        &self.win
    }

    pub fn loss_table(&self) -> &[u8] {
        &self.loss
    }
}

struct Builder<'a> {
    entries: &'a [Entry],
    end_scale: u32,
    k: f64,
}

impl Builder<'_> {
    fn find(&self, wins: u32, runs: u32) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.wins as u32 == wins && e.runs as u32 == runs)
    }

    /// Transition out of a state whose `runs` is already at the end of scale.
    fn saturated(&self, s: usize, won: bool) -> usize {
        let best = self.entries.len() - 1;
        let (w, r) = (self.entries[s].wins as u32, self.entries[s].runs as u32);
        if w == 0 && !won {
            return 1;
        }
        if w == r && won {
            return best;
        }
        if self.end_scale < 4 {
            let target = if won { w + 1 } else { w - 1 };
            return self.find(target, r).unwrap_or(s);
        }

        // Confirmation: drop to a lower run count that reflects how far the
        // observed rate is from even.
        let lean = (w as f64 / r as f64 - 0.5).abs();
        // Large `k` can ask for more than `r` runs back; 0 matches no state,
        // so the state then saturates in place.
        let nv = r.saturating_sub((self.k * r as f64 * lean).round() as u32);
        let found = if won {
            (s + 1..=best).find(|&i| self.entries[i].runs as u32 == nv)
        } else {
            (1..s).rev().find(|&i| self.entries[i].runs as u32 == nv)
        };
        found.unwrap_or(s)
    }
}

fn agresti_coull(wins: u32, runs: u32) -> (f64, f64) {
    let k2 = Z_UPPER_QUARTILE * Z_UPPER_QUARTILE;
    let p = (wins as f64 + 0.5 * k2) / (runs as f64 + k2);
    let half_width = Z_UPPER_QUARTILE * ((1.0 - p) * p / runs as f64).sqrt();
    (p, half_width)
}

fn agresti_coull_lower(wins: u32, runs: u32) -> f64 {
    let (p, h) = agresti_coull(wins, runs);
    p - h
}

fn agresti_coull_upper(wins: u32, runs: u32) -> f64 {
    let (p, h) = agresti_coull(wins, runs);
    p + h
}

impl PartialEq for WinLossStates {
    fn eq(&self, other: &Self) -> bool {
        self.end_scale == other.end_scale
            && self.entries == other.entries
            && self.win == other.win
            && self.loss == other.loss
    }
}
