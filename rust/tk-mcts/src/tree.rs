//! Shared UCT search tree: descent, expansion, backpropagation.
//!
//! One `SearchTree` is shared by every search thread of a process. All
//! statistics are atomics updated in place; the only lock is the
//! transposition index, taken when a node is allocated. Playouts in flight
//! put a virtual loss on each move of their path so concurrent descents
//! spread out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use thiserror::Error;
use tk_core::config::{SearchConfig, ValueMode};
use tk_core::{Board, Color, IllegalMove, Move};
use tk_wls::WinLossStates;
use tracing::{debug, warn};

use crate::arena::Arena;
use crate::node::{MoveStats, NodeId, SearchNode, NO_CHILD};
use crate::prior::PriorSource;

/// Added to the score of unexplored moves whose prior clears the threshold.
const URGENT: f32 = 1.0e6;

/// What `apply_cluster_totals` added to a node, indexed like `root_totals`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTotals {
    /// Moves whose run count grew.
    pub raised: usize,
    pub runs: Vec<u32>,
    pub wins: Vec<u32>,
}

impl AppliedTotals {
    fn empty(slots: usize) -> Self {
        Self {
            raised: 0,
            runs: vec![0; slots],
            wins: vec![0; slots],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub exploration: f32,
    pub gestation: u32,
    pub prior_threshold: f32,
    pub prior_weight: f32,
    pub virtual_loss: u32,
    pub value_mode: ValueMode,
    /// Longest path a single descent may take.
    pub max_depth: usize,
    pub arena_capacity: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for TreeParams {
    fn from(cfg: &SearchConfig) -> Self {
        Self {
            exploration: cfg.exploration,
            gestation: cfg.gestation,
            prior_threshold: cfg.prior_threshold,
            prior_weight: cfg.prior_weight,
            virtual_loss: cfg.virtual_loss,
            value_mode: cfg.value_mode,
            max_depth: cfg.max_playout_moves,
            arena_capacity: cfg.arena_capacity,
        }
    }
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("node arena is full ({0} nodes)")]
    ArenaFull(usize),
    #[error("illegal move {mv} during descent: {source}")]
    IllegalMove {
        mv: Move,
        #[source]
        source: IllegalMove,
    },
    #[error("totals have length {got}, expected {expected}")]
    LengthMismatch { expected: usize, got: usize },
}

/// One `(node, move)` pair of a descent path; `mv` indexes `SearchNode::moves`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStep {
    pub node: NodeId,
    pub mv: usize,
}

pub struct SearchTree {
    params: TreeParams,
    wls: Arc<WinLossStates>,
    arena: Arena,
    index: Mutex<FxHashMap<u64, NodeId>>,
    full_logged: AtomicBool,
}

impl SearchTree {
    pub fn new(params: TreeParams, wls: Arc<WinLossStates>) -> Self {
        Self {
            arena: Arena::with_capacity(params.arena_capacity),
            params,
            wls,
            index: Mutex::new(FxHashMap::default()),
            full_logged: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn wls(&self) -> &WinLossStates {
        &self.wls
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&SearchNode> {
        self.arena.get(id)
    }

    /// Node for a position hash, if one exists.
    pub fn lookup(&self, hash: u64) -> Option<NodeId> {
        self.index.lock().unwrap().get(&hash).copied()
    }

    /// Node for `board`, allocating it if needed.
    pub fn node_for(&self, board: &Board, priors: &dyn PriorSource) -> Result<NodeId, TreeError> {
        let hash = board.hash();
        if let Some(id) = self.lookup(hash) {
            return Ok(id);
        }
        // Built outside the lock; a racing thread may win and this copy is dropped.
        let node = SearchNode::new(board, priors);
        let mut index = self.index.lock().unwrap();
        if let Some(&id) = index.get(&hash) {
            return Ok(id);
        }
        match self.arena.push(node) {
            Some(id) => {
                index.insert(hash, id);
                Ok(id)
            }
            None => {
                if !self.full_logged.swap(true, Ordering::Relaxed) {
                    warn!(
                        capacity = self.arena.capacity(),
                        "search tree is full; expansion stops until the next clear"
                    );
                }
                Err(TreeError::ArenaFull(self.arena.capacity()))
            }
        }
    }

    /// Walk from the node for `board` by UCT, playing each chosen move on
    /// `board` and leaving a virtual loss on it. Stops at the first move with
    /// no child. A finished game yields an empty path.
    pub fn descend(
        &self,
        board: &mut Board,
        priors: &dyn PriorSource,
    ) -> Result<Vec<PathStep>, TreeError> {
        let mut path = Vec::new();
        if board.game_over() {
            return Ok(path);
        }
        let mut id = self.node_for(board, priors)?;
        while path.len() < self.params.max_depth {
            let Some(node) = self.arena.get(id) else {
                break;
            };
            let Some(i) = self.select(node) else {
                break;
            };
            let m = &node.moves[i];
            if let Err(source) = board.play(m.mv) {
                self.abandon(&path);
                return Err(TreeError::IllegalMove { mv: m.mv, source });
            }
            if self.params.virtual_loss > 0 {
                m.virtual_loss
                    .fetch_add(self.params.virtual_loss, Ordering::AcqRel);
            }
            path.push(PathStep { node: id, mv: i });
            match m.child() {
                Some(child) if !board.game_over() => id = child,
                _ => break,
            }
        }
        Ok(path)
    }

    fn select(&self, node: &SearchNode) -> Option<usize> {
        let p = &self.params;
        let ln_total = (node.total_runs().max(1) as f32).ln();
        let mut best: Option<(usize, f32)> = None;
        for (i, m) in node.moves.iter().enumerate() {
            let (w, r) = m.counts();
            let vl = m.virtual_loss.load(Ordering::Acquire);
            let bias = p.prior_weight * m.prior / (1 + r) as f32;
            let score = if r == 0 && vl == 0 {
                if m.prior > p.prior_threshold {
                    URGENT + m.prior
                } else {
                    m.prior + p.exploration * ln_total.sqrt() + bias
                }
            } else {
                let n = (r + vl) as f32;
                self.value(m, w, r, vl) + p.exploration * (ln_total / n).sqrt() + bias
            };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        best.map(|(i, _)| i)
    }

    fn value(&self, m: &MoveStats, wins: u32, runs: u32, vl: u32) -> f32 {
        let seen = (runs + vl) as f32;
        match self.params.value_mode {
            ValueMode::Counts => wins as f32 / seen,
            ValueMode::Wls => {
                let s = m.wls_state.load(Ordering::Acquire);
                self.wls.win_rate(s) * runs as f32 / seen
            }
        }
    }

    /// Give the last move of `path` its own node once it has gestated.
    /// `board` is the position after that move. Returns the new child.
    pub fn expand(
        &self,
        path: &[PathStep],
        board: &Board,
        priors: &dyn PriorSource,
    ) -> Option<NodeId> {
        let last = path.last()?;
        let m = &self.arena.get(last.node)?.moves[last.mv];
        if m.child().is_some() || m.runs.load(Ordering::Acquire) < self.params.gestation {
            return None;
        }
        let id = self.node_for(board, priors).ok()?;
        m.child
            .compare_exchange(NO_CHILD, id, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| id)
    }

    /// Record `winner` on every step of `path`, leaf to root, and lift the
    /// path's virtual losses.
    pub fn backpropagate(&self, path: &[PathStep], winner: Color) {
        let vl = self.params.virtual_loss;
        for step in path.iter().rev() {
            let Some(node) = self.arena.get(step.node) else {
                continue;
            };
            let m = &node.moves[step.mv];
            if vl > 0 {
                m.virtual_loss.fetch_sub(vl, Ordering::AcqRel);
            }
            let won = winner == node.to_play;
            m.runs.fetch_add(1, Ordering::Release);
            if won {
                m.wins.fetch_add(1, Ordering::Release);
            }
            let wls = &*self.wls;
            let _ = m
                .wls_state
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                    Some(wls.update(s, won))
                });
            node.total_runs.fetch_add(1, Ordering::Release);
        }
    }

    /// Lift the path's virtual losses without recording a result.
    pub fn abandon(&self, path: &[PathStep]) {
        let vl = self.params.virtual_loss;
        if vl == 0 {
            return;
        }
        for step in path {
            if let Some(node) = self.arena.get(step.node) {
                node.moves[step.mv]
                    .virtual_loss
                    .fetch_sub(vl, Ordering::AcqRel);
            }
        }
    }

    /// Most-run move from the node for `board`.
    pub fn best_move(&self, board: &Board) -> Option<Move> {
        let node = self.arena.get(self.lookup(board.hash())?)?;
        node.best_move_index().map(|i| node.moves[i].mv)
    }

    /// Playouts recorded at the node for `board`.
    pub fn root_playouts(&self, board: &Board) -> u32 {
        self.lookup(board.hash())
            .and_then(|id| self.arena.get(id))
            .map_or(0, |n| n.total_runs())
    }

    /// Per-move `(runs, wins)` at the node for `board`, indexed by
    /// `Move::index(area)`. Zeros when there is no node.
    pub fn root_totals(&self, board: &Board) -> (Vec<u32>, Vec<u32>) {
        let area = board.area();
        let mut runs = vec![0u32; area + 1];
        let mut wins = vec![0u32; area + 1];
        if let Some(node) = self.lookup(board.hash()).and_then(|id| self.arena.get(id)) {
            for m in &node.moves {
                let (w, r) = m.counts();
                let slot = m.mv.index(area);
                runs[slot] = r;
                wins[slot] = w;
            }
        }
        (runs, wins)
    }

    /// Raise the node for `board` to cluster-merged totals. Counts only grow.
    /// Returns exactly what was added, per move slot.
    pub fn apply_cluster_totals(
        &self,
        board: &Board,
        priors: &dyn PriorSource,
        runs: &[u32],
        wins: &[u32],
    ) -> Result<AppliedTotals, TreeError> {
        let area = board.area();
        for got in [runs.len(), wins.len()] {
            if got != area + 1 {
                return Err(TreeError::LengthMismatch {
                    expected: area + 1,
                    got,
                });
            }
        }
        let mut applied = AppliedTotals::empty(area + 1);
        let id = self.node_for(board, priors)?;
        let Some(node) = self.arena.get(id) else {
            return Ok(applied);
        };
        for m in &node.moves {
            let slot = m.mv.index(area);
            let prev = m.runs.fetch_max(runs[slot], Ordering::AcqRel);
            if runs[slot] > prev {
                let delta = runs[slot] - prev;
                node.total_runs.fetch_add(delta, Ordering::Release);
                applied.runs[slot] = delta;
                applied.raised += 1;
            }
            let cap = m.runs.load(Ordering::Acquire);
            let target = wins[slot].min(cap);
            if let Ok(prev) = m
                .wins
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                    (target > w).then_some(target)
                })
            {
                applied.wins[slot] = target - prev;
            }
            let (w, r) = m.counts();
            m.wls_state
                .store(self.wls.nearest_state(w, r), Ordering::Release);
        }
        debug!(node = id, raised = applied.raised, "applied cluster totals");
        Ok(applied)
    }

    /// Drop every node. Slot allocation is kept for the next game.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.index.get_mut().unwrap().clear();
        *self.full_logged.get_mut() = false;
    }

    /// Panic unless every node satisfies `total_runs == sum(runs)`,
    /// `wins <= runs`, carries no virtual loss and links only to live nodes.
    /// Call only while no playout is in flight.
    pub fn assert_consistent(&self) {
        let len = self.arena.len();
        for (id, node) in self.arena.iter() {
            let mut sum = 0u64;
            for (i, m) in node.moves.iter().enumerate() {
                let (w, r) = m.counts();
                assert!(w <= r, "node {id} move {i}: wins {w} > runs {r}");
                let vl = m.virtual_loss.load(Ordering::Acquire);
                assert_eq!(vl, 0, "node {id} move {i}: virtual loss {vl} left behind");
                if let Some(c) = m.child() {
                    assert!((c as usize) < len, "node {id} move {i}: dangling child {c}");
                }
                sum += r as u64;
            }
            assert_eq!(
                sum,
                node.total_runs() as u64,
                "node {id}: total_runs does not match the sum of move runs"
            );
        }
    }
}
