//! Protocol v1 messages between cluster workers and the aggregator.
//!
//! Both ends issue requests over the same connection. Every frame carries a
//! request id; `Registered` and `Reply` answer the request with the same id.

use tk_core::Move;
use tk_runtime::SearchBudget;

pub const PROTOCOL_VERSION: u32 = 1;

/// Directory name of the aggregator.
pub const SEARCH_CONTROLLER_NAME: &str = "SearchController";

/// Directory name of the aggregator for `shard`, or the plain name.
pub fn service_name(base: &str, shard: Option<u32>) -> String {
    match shard {
        Some(shard) => format!("{base}{shard}"),
        None => base.to_string(),
    }
}

pub type WorkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    AddWorker = 1,
    AcceptResults = 2,
    RemoveWorker = 3,
    Heartbeat = 4,
    Registered = 5,
    Reply = 6,
    Command = 7,
}

impl MsgKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            1 => MsgKind::AddWorker,
            2 => MsgKind::AcceptResults,
            3 => MsgKind::RemoveWorker,
            4 => MsgKind::Heartbeat,
            5 => MsgKind::Registered,
            6 => MsgKind::Reply,
            7 => MsgKind::Command,
            _ => return None,
        })
    }
}

/// Aggregator → worker requests.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    Reset,
    BeginSearch {
        search_id: u64,
        budget: SearchBudget,
    },
    /// `turn` is the number of moves the worker's board must already hold.
    AcceptMove {
        turn: u32,
        mv: Move,
    },
    SetKomi(f32),
    SetProperty {
        key: String,
        value: String,
    },
    GetPlayer,
    StopSearch,
    ApplyTotals {
        runs: Vec<u32>,
        wins: Vec<u32>,
    },
}

impl WorkerCommand {
    pub fn tag(&self) -> u8 {
        match self {
            WorkerCommand::Reset => 1,
            WorkerCommand::BeginSearch { .. } => 2,
            WorkerCommand::AcceptMove { .. } => 3,
            WorkerCommand::SetKomi(_) => 4,
            WorkerCommand::SetProperty { .. } => 5,
            WorkerCommand::GetPlayer => 6,
            WorkerCommand::StopSearch => 7,
            WorkerCommand::ApplyTotals { .. } => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    AddWorker {
        name: String,
        player: String,
    },
    /// Cumulative per-move totals at the worker's current root, indexed by
    /// `Move::index(area)`. `complete` marks the last report of a search.
    AcceptResults {
        worker_id: WorkerId,
        search_id: u64,
        complete: bool,
        runs: Vec<u32>,
        wins: Vec<u32>,
    },
    RemoveWorker {
        worker_id: WorkerId,
    },
    Heartbeat {
        worker_id: WorkerId,
    },
    Registered {
        worker_id: WorkerId,
    },
    Reply {
        ok: bool,
        detail: String,
    },
    Command(WorkerCommand),
}

impl Message {
    pub fn kind(&self) -> MsgKind {
        match self {
            Message::AddWorker { .. } => MsgKind::AddWorker,
            Message::AcceptResults { .. } => MsgKind::AcceptResults,
            Message::RemoveWorker { .. } => MsgKind::RemoveWorker,
            Message::Heartbeat { .. } => MsgKind::Heartbeat,
            Message::Registered { .. } => MsgKind::Registered,
            Message::Reply { .. } => MsgKind::Reply,
            Message::Command(_) => MsgKind::Command,
        }
    }

    /// Answers to an earlier request rather than requests of their own.
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Registered { .. } | Message::Reply { .. })
    }

    pub fn ok(detail: impl Into<String>) -> Self {
        Message::Reply {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Message::Reply {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// One frame: a message and the request id it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub request_id: u64,
    pub msg: Message,
}
