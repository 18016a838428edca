//! Unified configuration schema for tenuki.
//!
//! One YAML file drives every process in a cluster (aggregator and workers),
//! so all sections live here even when only one crate reads them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::board::{MAX_SIZE, MIN_SIZE};

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub wls: WlsConfig,
    #[serde(default)]
    pub patterns: PatternsConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoardConfig {
    #[serde(default = "default_board_size")]
    pub size: usize,
    #[serde(default = "default_komi")]
    pub komi: f32,
}

fn default_board_size() -> usize {
    9
}

fn default_komi() -> f32 {
    7.5
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            size: default_board_size(),
            komi: default_komi(),
        }
    }
}

/// How a move's value term is computed during descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    /// `wins / (runs + virtual_loss)`.
    #[default]
    Counts,
    /// Win rate of the move's win/loss state.
    Wls,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Search threads sharing one tree.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// UCT exploration constant `c`.
    #[serde(default = "default_exploration")]
    pub exploration: f32,
    /// Runs a move needs before its child node is allocated.
    #[serde(default = "default_gestation")]
    pub gestation: u32,
    /// Unexplored moves with a prior above this are tried before explored ones.
    #[serde(default = "default_prior_threshold")]
    pub prior_threshold: f32,
    #[serde(default = "default_prior_weight")]
    pub prior_weight: f32,
    /// Losses added to a move while a playout through it is in flight.
    #[serde(default = "default_virtual_loss")]
    pub virtual_loss: u32,
    #[serde(default)]
    pub value_mode: ValueMode,
    #[serde(default = "default_max_playout_moves")]
    pub max_playout_moves: usize,
    /// Maximum number of tree nodes.
    #[serde(default = "default_arena_capacity")]
    pub arena_capacity: usize,
    /// Default playout budget for a search.
    #[serde(default = "default_playouts")]
    pub playouts: u32,
    #[serde(default)]
    pub seed: u64,
}

fn default_threads() -> usize {
    1
}

fn default_exploration() -> f32 {
    0.7
}

fn default_gestation() -> u32 {
    2
}

fn default_prior_threshold() -> f32 {
    0.75
}

fn default_prior_weight() -> f32 {
    0.5
}

fn default_virtual_loss() -> u32 {
    1
}

fn default_max_playout_moves() -> usize {
    1000
}

fn default_arena_capacity() -> usize {
    1 << 16
}

fn default_playouts() -> u32 {
    1000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            exploration: default_exploration(),
            gestation: default_gestation(),
            prior_threshold: default_prior_threshold(),
            prior_weight: default_prior_weight(),
            virtual_loss: default_virtual_loss(),
            value_mode: ValueMode::default(),
            max_playout_moves: default_max_playout_moves(),
            arena_capacity: default_arena_capacity(),
            playouts: default_playouts(),
            seed: 0,
        }
    }
}

/// Win/loss state table parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WlsConfig {
    /// Largest run count a state can represent (1..=21).
    #[serde(default = "default_end_scale")]
    pub end_scale: u32,
    #[serde(default)]
    pub ini_wins: u32,
    #[serde(default)]
    pub ini_visits: u32,
    /// Scale of the saturated-state confirmation heuristic.
    #[serde(default = "default_confirmation_k")]
    pub confirmation_k: f64,
}

fn default_end_scale() -> u32 {
    21
}

fn default_confirmation_k() -> f64 {
    1.3
}

impl Default for WlsConfig {
    fn default() -> Self {
        Self {
            end_scale: default_end_scale(),
            ini_wins: 0,
            ini_visits: 0,
            confirmation_k: default_confirmation_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternsConfig {
    #[serde(default = "default_sub_tables")]
    pub sub_tables: u32,
    #[serde(default = "default_bits_per_table")]
    pub bits_per_table: u32,
    #[serde(default = "default_decay")]
    pub decay: f32,
    /// Seed for the fingerprint keys. Every process sharing a table must agree.
    #[serde(default = "default_pattern_seed")]
    pub seed: u64,
    /// Optional table to load at startup.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_sub_tables() -> u32 {
    4
}

fn default_bits_per_table() -> u32 {
    16
}

fn default_decay() -> f32 {
    0.99
}

fn default_pattern_seed() -> u64 {
    0x5EED
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            sub_tables: default_sub_tables(),
            bits_per_table: default_bits_per_table(),
            decay: default_decay(),
            seed: default_pattern_seed(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Base name the aggregator is registered under.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Shard index appended to `service_name` when set.
    #[serde(default)]
    pub shard: Option<u32>,
    /// Static service directory: name -> `host:port`.
    #[serde(default)]
    pub directory: BTreeMap<String, String>,
    /// Aggregator listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,
    /// Worker heartbeat period.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Records with no contact for this long are evicted.
    #[serde(default = "default_eviction_ms")]
    pub eviction_ms: u64,
    /// How often a searching worker reports interim totals.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// Optional NDJSON event log written by the aggregator.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

fn default_service_name() -> String {
    "SearchController".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_max_retry_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_ms() -> u64 {
    1000
}

fn default_eviction_ms() -> u64 {
    5000
}

fn default_report_interval_ms() -> u64 {
    250
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            shard: None,
            directory: BTreeMap::new(),
            bind: default_bind(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            eviction_ms: default_eviction_ms(),
            report_interval_ms: default_report_interval_ms(),
            event_log: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: String| Err(ConfigError::Invalid(msg));
        let b = &self.board;
        if !(MIN_SIZE..=MAX_SIZE).contains(&b.size) {
            return bad(format!(
                "board.size must be in {MIN_SIZE}..={MAX_SIZE}, got {}",
                b.size
            ));
        }
        let s = &self.search;
        if s.threads == 0 {
            return bad("search.threads must be >= 1".into());
        }
        if !(s.exploration >= 0.0) {
            return bad(format!("search.exploration must be >= 0, got {}", s.exploration));
        }
        if !(0.0..=1.0).contains(&s.prior_threshold) {
            return bad(format!(
                "search.prior_threshold must be in [0,1], got {}",
                s.prior_threshold
            ));
        }
        if s.arena_capacity == 0 || s.arena_capacity >= u32::MAX as usize {
            return bad(format!("search.arena_capacity out of range: {}", s.arena_capacity));
        }
        let w = &self.wls;
        if !(1..=21).contains(&w.end_scale) {
            return bad(format!("wls.end_scale must be in 1..=21, got {}", w.end_scale));
        }
        if w.ini_wins > w.ini_visits {
            return bad("wls.ini_wins must not exceed wls.ini_visits".into());
        }
        if !(w.confirmation_k > 0.0) {
            return bad("wls.confirmation_k must be > 0".into());
        }
        let p = &self.patterns;
        if p.sub_tables == 0 || p.bits_per_table == 0 || p.bits_per_table > 24 {
            return bad("patterns: sub_tables >= 1 and bits_per_table in 1..=24".into());
        }
        if p.sub_tables.checked_mul(p.bits_per_table).map_or(true, |b| b > 64) {
            return bad("patterns: sub_tables * bits_per_table must be <= 64".into());
        }
        if !(p.decay > 0.0 && p.decay < 1.0) {
            return bad(format!("patterns.decay must be in (0,1), got {}", p.decay));
        }
        let c = &self.cluster;
        if c.retry_interval_ms == 0 || c.retry_interval_ms > c.max_retry_interval_ms {
            return bad("cluster: 0 < retry_interval_ms <= max_retry_interval_ms".into());
        }
        if c.heartbeat_ms == 0 || c.eviction_ms <= c.heartbeat_ms {
            return bad("cluster: eviction_ms must exceed heartbeat_ms > 0".into());
        }
        Ok(())
    }

    /// Directory name of the aggregator this process talks to.
    pub fn controller_name(&self) -> String {
        match self.cluster.shard {
            Some(shard) => format!("{}{}", self.cluster.service_name, shard),
            None => self.cluster.service_name.clone(),
        }
    }
}
