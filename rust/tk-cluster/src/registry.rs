//! Aggregator bookkeeping: one record per live worker, no I/O.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tk_core::Move;
use tracing::warn;

use crate::protocol::WorkerId;

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub name: String,
    pub player: String,
    /// Search the stored totals belong to; 0 before the first report.
    pub search_id: u64,
    pub complete: bool,
    pub runs: Vec<u32>,
    pub wins: Vec<u32>,
    pub last_contact: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    Stored,
    /// Older than what the record already holds; ignored.
    Stale,
    UnknownWorker,
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerRecord> {
        self.workers.get(&id)
    }

    pub fn add(&mut self, worker_id: WorkerId, name: &str, player: &str, now: Instant) {
        self.workers.insert(
            worker_id,
            WorkerRecord {
                worker_id,
                name: name.to_string(),
                player: player.to_string(),
                search_id: 0,
                complete: false,
                runs: Vec::new(),
                wins: Vec::new(),
                last_contact: now,
            },
        );
    }

    /// Replace the worker's totals with a newer report. Reports are
    /// cumulative, so a repeated report leaves the merge unchanged.
    pub fn accept(
        &mut self,
        worker_id: WorkerId,
        search_id: u64,
        complete: bool,
        runs: Vec<u32>,
        wins: Vec<u32>,
        now: Instant,
    ) -> Accepted {
        let Some(rec) = self.workers.get_mut(&worker_id) else {
            return Accepted::UnknownWorker;
        };
        rec.last_contact = now;
        let older = search_id < rec.search_id
            || (search_id == rec.search_id && rec.complete && !complete);
        if older {
            return Accepted::Stale;
        }
        rec.search_id = search_id;
        rec.complete = complete;
        rec.runs = runs;
        rec.wins = wins;
        Accepted::Stored
    }

    /// Record a sign of life. False for unknown workers.
    pub fn touch(&mut self, worker_id: WorkerId, now: Instant) -> bool {
        match self.workers.get_mut(&worker_id) {
            Some(rec) => {
                rec.last_contact = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, worker_id: WorkerId) -> Option<WorkerRecord> {
        self.workers.remove(&worker_id)
    }

    /// Drop every worker not heard from within `max_age`.
    pub fn evict_stale(&mut self, now: Instant, max_age: Duration) -> Vec<WorkerRecord> {
        let stale: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|r| now.saturating_duration_since(r.last_contact) > max_age)
            .map(|r| r.worker_id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.workers.remove(&id))
            .collect()
    }

    /// Workers whose stored report belongs to `search_id`, and whether that
    /// report was the last one of the search.
    pub fn reported(&self, search_id: u64) -> impl Iterator<Item = (WorkerId, bool)> + '_ {
        self.workers
            .values()
            .filter(move |r| r.search_id == search_id && !r.runs.is_empty())
            .map(|r| (r.worker_id, r.complete))
    }

    /// Element-wise sum of every stored report, optionally only those for
    /// `search_id`. Reports whose length differs from the first one are
    /// skipped. `None` when nothing matched.
    pub fn merged_totals(&self, search_id: Option<u64>) -> Option<(Vec<u32>, Vec<u32>)> {
        let mut merged: Option<(Vec<u32>, Vec<u32>)> = None;
        for rec in self.workers.values() {
            if rec.runs.is_empty() || search_id.is_some_and(|s| s != rec.search_id) {
                continue;
            }
            match &mut merged {
                None => merged = Some((rec.runs.clone(), rec.wins.clone())),
                Some((runs, wins)) => {
                    if rec.runs.len() != runs.len() {
                        warn!(
                            worker_id = rec.worker_id,
                            got = rec.runs.len(),
                            expected = runs.len(),
                            "report length differs; skipped in merge"
                        );
                        continue;
                    }
                    for (acc, &x) in runs.iter_mut().zip(&rec.runs) {
                        *acc = acc.saturating_add(x);
                    }
                    for (acc, &x) in wins.iter_mut().zip(&rec.wins) {
                        *acc = acc.saturating_add(x);
                    }
                }
            }
        }
        merged
    }
}

/// Most runs; ties go to more wins, then to the lower index. `None` when
/// nothing has been run. Slots are `Move::index(area)` with pass last.
pub fn best_move(runs: &[u32], wins: &[u32]) -> Option<Move> {
    let area = runs.len().checked_sub(1)?;
    let mut best: Option<(usize, u32, u32)> = None;
    for (i, &r) in runs.iter().enumerate() {
        let w = wins.get(i).copied().unwrap_or(0);
        if r == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, br, bw)) => r > br || (r == br && w > bw),
        };
        if better {
            best = Some((i, r, w));
        }
    }
    best.and_then(|(i, _, _)| Move::from_index(i, area))
}
