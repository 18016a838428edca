//! tk-cluster: merge search statistics from workers on many machines.
//!
//! Workers connect to an aggregator found through a [`ServiceDirectory`],
//! register, run searches on command and report cumulative root totals. The
//! aggregator sums the latest report of every live worker.

use std::io;

use thiserror::Error;
use tk_logging::NdjsonError;
use tk_runtime::PlayerError;

pub mod aggregator;
pub mod codec;
pub mod directory;
pub mod frame;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod worker;

pub use aggregator::{Aggregator, AggregatorOptions, ClusterEvent, SearchRound};
pub use directory::{LookupError, ServiceDirectory, StaticDirectory};
pub use protocol::{
    service_name, Message, WorkerCommand, WorkerId, PROTOCOL_VERSION, SEARCH_CONTROLLER_NAME,
};
pub use registry::{best_move, Accepted, WorkerRecord, WorkerRegistry};
pub use worker::{try_to_connect, ClusterWorker, WorkerOptions, WorkerState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] frame::FrameError),
    #[error("decode error: {0}")]
    Decode(#[from] codec::DecodeError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Player(#[from] PlayerError),
    #[error("event log: {0}")]
    Log(#[from] NdjsonError),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    #[error("board is at turn {actual}, move was sent for turn {expected}")]
    OutOfSync { expected: u32, actual: usize },
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),
    #[error("no worker accepted the search")]
    NoWorkers,
    #[error("connection closed")]
    Disconnected,
    #[error("request timed out")]
    Timeout,
}

/// Map a `Reply` to its detail string, or to `Remote` for error replies.
pub(crate) fn expect_ok(reply: Message, request: &'static str) -> Result<String, ClusterError> {
    match reply {
        Message::Reply { ok: true, detail } => Ok(detail),
        Message::Reply { ok: false, detail } => Err(ClusterError::Remote(detail)),
        _ => Err(ClusterError::UnexpectedReply(request)),
    }
}


#[cfg(test)]
mod codec_tests;
