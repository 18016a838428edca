//! UCT player: N search threads over one shared tree and pattern table.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tk_core::config::ValueMode;
use tk_core::{Board, Config, Move};
use tk_mcts::{AppliedTotals, PatternPriors, PlayoutError, SearchTree, SimulationWorker, TreeParams};
use tk_patterns::{PatternHasher, PatternValueTable};
use tk_wls::WinLossStates;
use tracing::{debug, info, warn};

use crate::player::{illegal, parse_value, Player, PlayerError, SearchBudget, SearchReport};

struct RunningSearch {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<SearchReport>,
}

/// Root counts received through `apply_totals`. Reports leave them out so
/// the aggregator only ever sums playouts each worker ran itself.
#[derive(Debug, Default)]
struct ClusterShare {
    runs: Vec<u32>,
    wins: Vec<u32>,
}

impl ClusterShare {
    fn add(&mut self, applied: &AppliedTotals) {
        if self.runs.len() != applied.runs.len() {
            self.runs = vec![0; applied.runs.len()];
            self.wins = vec![0; applied.wins.len()];
        }
        for (r, d) in self.runs.iter_mut().zip(&applied.runs) {
            *r += d;
        }
        for (w, d) in self.wins.iter_mut().zip(&applied.wins) {
            *w += d;
        }
    }

    /// `totals` minus the received share.
    fn local(&self, (mut runs, mut wins): (Vec<u32>, Vec<u32>)) -> (Vec<u32>, Vec<u32>) {
        if self.runs.len() == runs.len() {
            for i in 0..runs.len() {
                runs[i] = runs[i].saturating_sub(self.runs[i]);
                wins[i] = wins[i].saturating_sub(self.wins[i]).min(runs[i]);
            }
        }
        (runs, wins)
    }

    fn clear(&mut self) {
        self.runs.clear();
        self.wins.clear();
    }
}

pub struct MctsPlayer {
    config: Config,
    wls: Arc<WinLossStates>,
    patterns: Arc<PatternPriors>,
    tree: Arc<SearchTree>,
    board: Board,
    running: Option<RunningSearch>,
    cluster: ClusterShare,
    /// Searches started so far; mixed into the playout seed.
    searches: u64,
}

impl MctsPlayer {
    pub fn new(config: &Config) -> Result<Self, PlayerError> {
        let wls = Arc::new(WinLossStates::from_config(&config.wls)?);
        let table = Arc::new(PatternValueTable::from_config(&config.patterns)?);
        let patterns = Arc::new(PatternPriors::new(
            PatternHasher::new(config.patterns.seed),
            table,
        ));
        let tree = Arc::new(SearchTree::new(
            TreeParams::from(&config.search),
            Arc::clone(&wls),
        ));
        info!(
            size = config.board.size,
            threads = config.search.threads,
            value_mode = ?config.search.value_mode,
            "mcts player ready"
        );
        Ok(Self {
            config: config.clone(),
            wls,
            patterns,
            tree,
            board: Board::new(config.board.size, config.board.komi),
            running: None,
            cluster: ClusterShare::default(),
            searches: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree(&self) -> &Arc<SearchTree> {
        &self.tree
    }

    pub fn patterns(&self) -> &Arc<PatternPriors> {
        &self.patterns
    }

    fn job(&mut self, budget: SearchBudget) -> SearchJob {
        let seed = self
            .config
            .search
            .seed
            .wrapping_add(self.searches.wrapping_mul(0xD1B5_4A32_D192_ED03));
        self.searches += 1;
        SearchJob {
            tree: Arc::clone(&self.tree),
            patterns: Arc::clone(&self.patterns),
            board: self.board.clone(),
            budget,
            threads: self.config.search.threads,
            seed,
        }
    }

    fn rebuild_tree(&mut self) {
        self.tree = Arc::new(SearchTree::new(
            TreeParams::from(&self.config.search),
            Arc::clone(&self.wls),
        ));
    }
}

impl Player for MctsPlayer {
    fn name(&self) -> &str {
        "mcts"
    }

    fn board(&self) -> &Board {
        &self.board
    }

    fn reset(&mut self) -> Result<(), PlayerError> {
        self.stop_search();
        // Search threads hold clones of the tree only while running.
        let tree = Arc::get_mut(&mut self.tree).ok_or(PlayerError::Busy)?;
        tree.clear();
        self.board.clear();
        self.cluster.clear();
        Ok(())
    }

    fn accept_move(&mut self, mv: Move) -> Result<(), PlayerError> {
        self.stop_search();
        self.board
            .play(mv)
            .map_err(|source| illegal(&self.board, mv, source))?;
        self.cluster.clear();
        Ok(())
    }

    fn set_komi(&mut self, komi: f32) -> Result<(), PlayerError> {
        self.config.board.komi = komi;
        self.board.set_komi(komi);
        Ok(())
    }

    fn set_property(&mut self, key: &str, value: &str) -> Result<(), PlayerError> {
        if self.is_searching() {
            return Err(PlayerError::Busy);
        }
        let mut next = self.config.clone();
        let s = &mut next.search;
        let mut tree_changed = true;
        match key {
            "threads" => {
                s.threads = parse_value(key, value)?;
                tree_changed = false;
            }
            "seed" => {
                s.seed = parse_value(key, value)?;
                tree_changed = false;
            }
            "playouts" => {
                s.playouts = parse_value(key, value)?;
                tree_changed = false;
            }
            "exploration" => s.exploration = parse_value(key, value)?,
            "gestation" => s.gestation = parse_value(key, value)?,
            "prior_threshold" => s.prior_threshold = parse_value(key, value)?,
            "prior_weight" => s.prior_weight = parse_value(key, value)?,
            "virtual_loss" => s.virtual_loss = parse_value(key, value)?,
            "max_playout_moves" => s.max_playout_moves = parse_value(key, value)?,
            "value_mode" => {
                s.value_mode = match value.trim() {
                    "counts" => ValueMode::Counts,
                    "wls" => ValueMode::Wls,
                    _ => {
                        return Err(PlayerError::InvalidValue {
                            key: key.to_string(),
                            value: value.to_string(),
                        })
                    }
                }
            }
            "board_size" => next.board.size = parse_value(key, value)?,
            _ => return Err(PlayerError::UnknownProperty(key.to_string())),
        }
        if next.validate().is_err() {
            return Err(PlayerError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        let resized = next.board.size != self.config.board.size;
        self.config = next;
        if resized {
            self.board = Board::new(self.config.board.size, self.config.board.komi);
        }
        if tree_changed {
            self.rebuild_tree();
        }
        if tree_changed || resized {
            self.cluster.clear();
        }
        debug!(key, value, "property set");
        Ok(())
    }

    fn search(&mut self, budget: SearchBudget) -> Result<SearchReport, PlayerError> {
        if self.is_searching() {
            return Err(PlayerError::Busy);
        }
        let job = self.job(budget);
        Ok(job.run(&AtomicBool::new(false)))
    }

    fn begin_search(&mut self, budget: SearchBudget) -> Result<(), PlayerError> {
        if self.is_searching() {
            return Err(PlayerError::Busy);
        }
        let job = self.job(budget);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || job.run(&flag));
        self.running = Some(RunningSearch { stop, handle });
        Ok(())
    }

    fn poll_search(&mut self) -> Option<SearchReport> {
        if self.running.as_ref()?.handle.is_finished() {
            self.stop_search()
        } else {
            None
        }
    }

    fn stop_search(&mut self) -> Option<SearchReport> {
        let running = self.running.take()?;
        running.stop.store(true, Ordering::Release);
        match running.handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                warn!("search thread panicked");
                None
            }
        }
    }

    fn is_searching(&self) -> bool {
        self.running.is_some()
    }

    fn best_move(&self) -> Option<Move> {
        self.tree.best_move(&self.board)
    }

    fn root_totals(&self) -> (Vec<u32>, Vec<u32>) {
        self.cluster.local(self.tree.root_totals(&self.board))
    }

    fn apply_totals(&mut self, runs: &[u32], wins: &[u32]) -> Result<usize, PlayerError> {
        let applied =
            self.tree
                .apply_cluster_totals(&self.board, self.patterns.as_ref(), runs, wins)?;
        self.cluster.add(&applied);
        Ok(applied.raised)
    }
}

impl Drop for MctsPlayer {
    fn drop(&mut self) {
        self.stop_search();
    }
}

struct SearchJob {
    tree: Arc<SearchTree>,
    patterns: Arc<PatternPriors>,
    board: Board,
    budget: SearchBudget,
    threads: usize,
    seed: u64,
}

impl SearchJob {
    /// Run playouts on `threads` scoped threads until the budget is spent or
    /// `stop` is raised.
    fn run(self, stop: &AtomicBool) -> SearchReport {
        let started = Instant::now();
        let (limit, deadline) = match self.budget {
            SearchBudget::Playouts(n) => (n, None),
            SearchBudget::Millis(ms) => (u64::MAX, Some(started + Duration::from_millis(ms))),
        };
        let tickets = AtomicU64::new(0);
        let completed = AtomicU64::new(0);
        let discarded = AtomicU64::new(0);

        thread::scope(|s| {
            for index in 0..self.threads.max(1) {
                let (tickets, completed, discarded) = (&tickets, &completed, &discarded);
                let board = &self.board;
                let mut worker = SimulationWorker::new(
                    Arc::clone(&self.tree),
                    Arc::clone(&self.patterns),
                    board,
                    self.seed,
                    index,
                );
                s.spawn(move || loop {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        break;
                    }
                    if tickets.fetch_add(1, Ordering::Relaxed) >= limit {
                        break;
                    }
                    match worker.run_one(board) {
                        Ok(_) => {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(PlayoutError::IllegalMove { .. }) => {
                            discarded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(PlayoutError::Tree(e)) => {
                            warn!(thread = index, error = %e, "search thread stopped");
                            break;
                        }
                    }
                });
            }
        });

        let report = SearchReport {
            playouts: completed.into_inner(),
            illegal: discarded.into_inner(),
            best: self.tree.best_move(&self.board),
            root_playouts: self.tree.root_playouts(&self.board),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            playouts = report.playouts,
            illegal = report.illegal,
            root_playouts = report.root_playouts,
            elapsed_ms = report.elapsed_ms,
            "search finished"
        );
        report
    }
}
