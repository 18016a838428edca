//! tk-logging: NDJSON cluster events + tracing setup.
//!
//! The aggregator appends one JSON object per line for every worker joining,
//! leaving, crashing or being evicted, and for every completed search round.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bumped whenever an event struct changes shape.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

pub fn now_ms() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    d.as_millis() as u64
}

pub fn hash_config_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Install a fmt subscriber. `RUST_LOG` overrides `default_level`.
/// Returns false if a global subscriber was already set.
pub fn init_tracing(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfoV1 {
    pub event_schema_version: u32,
    pub protocol_version: u32,
}

impl VersionInfoV1 {
    pub fn new(protocol_version: u32) -> Self {
        Self {
            event_schema_version: EVENT_SCHEMA_VERSION,
            protocol_version,
        }
    }
}

/// `event` is one of `worker_joined`, `worker_left`, `worker_crashed`,
/// `worker_evicted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEventV1 {
    pub event: String,
    pub ts_ms: u64,
    pub v: VersionInfoV1,

    pub worker_id: u64,
    pub name: String,
    pub player: String,
    pub live_workers: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRoundEventV1 {
    pub event: String,
    pub ts_ms: u64,
    pub v: VersionInfoV1,
    pub config_hash: Option<String>,

    pub search_id: u64,
    pub workers: u64,
    pub reported: u64,
    /// Sum of merged runs over all moves.
    pub total_runs: u64,
    /// GTP coordinate of the merged best move.
    pub best_move: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Error)]
pub enum NdjsonError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append. Creates it if it doesn't exist.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines=0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}
