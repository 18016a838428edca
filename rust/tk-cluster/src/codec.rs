//! Binary codec for protocol v1 (payload inside a length-delimited frame).
//!
//! Header: u32 version + u8 kind + u8 flags + u16 reserved, then u64
//! request id. All integers little-endian. Strings and vectors are u32
//! length-prefixed. Moves travel as u16 point indices, pass as `0xFFFF`.

use thiserror::Error;
use tk_core::Move;
use tk_runtime::SearchBudget;

use crate::protocol::{Envelope, Message, MsgKind, WorkerCommand, PROTOCOL_VERSION};

const PASS_WIRE: u16 = u16::MAX;
const BUDGET_PLAYOUTS: u8 = 1;
const BUDGET_MILLIS: u8 = 2;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload too short")]
    TooShort,
    #[error("unsupported protocol version: {0}")]
    BadVersion(u32),
    #[error("unexpected message kind: {0}")]
    BadKind(u8),
    #[error("unknown worker command: {0}")]
    BadCommand(u8),
    #[error("unknown search budget tag: {0}")]
    BadBudget(u8),
    #[error("invalid boolean byte: {0}")]
    BadBool(u8),
    #[error("string is not valid UTF-8")]
    BadUtf8,
    #[error("runs has {runs} entries but wins has {wins}")]
    LengthMismatch { runs: u32, wins: u32 },
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

pub fn encode_envelope(env: &Envelope) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    encode_envelope_into(&mut out, env);
    out
}

pub fn encode_envelope_into(out: &mut Vec<u8>, env: &Envelope) {
    out.clear();
    out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    out.push(env.msg.kind() as u8);
    out.push(0); // flags
    out.extend_from_slice(&[0, 0]); // reserved
    out.extend_from_slice(&env.request_id.to_le_bytes());

    match &env.msg {
        Message::AddWorker { name, player } => {
            put_str(out, name);
            put_str(out, player);
        }
        Message::AcceptResults {
            worker_id,
            search_id,
            complete,
            runs,
            wins,
        } => {
            out.extend_from_slice(&worker_id.to_le_bytes());
            out.extend_from_slice(&search_id.to_le_bytes());
            out.push(*complete as u8);
            put_totals(out, runs, wins);
        }
        Message::RemoveWorker { worker_id }
        | Message::Heartbeat { worker_id }
        | Message::Registered { worker_id } => {
            out.extend_from_slice(&worker_id.to_le_bytes());
        }
        Message::Reply { ok, detail } => {
            out.push(*ok as u8);
            put_str(out, detail);
        }
        Message::Command(cmd) => {
            out.push(cmd.tag());
            encode_command(out, cmd);
        }
    }
}

fn encode_command(out: &mut Vec<u8>, cmd: &WorkerCommand) {
    match cmd {
        WorkerCommand::Reset | WorkerCommand::GetPlayer | WorkerCommand::StopSearch => {}
        WorkerCommand::BeginSearch { search_id, budget } => {
            out.extend_from_slice(&search_id.to_le_bytes());
            let (tag, amount) = match budget {
                SearchBudget::Playouts(n) => (BUDGET_PLAYOUTS, *n),
                SearchBudget::Millis(ms) => (BUDGET_MILLIS, *ms),
            };
            out.push(tag);
            out.extend_from_slice(&amount.to_le_bytes());
        }
        WorkerCommand::AcceptMove { turn, mv } => {
            out.extend_from_slice(&turn.to_le_bytes());
            let wire = match mv {
                Move::Play(p) => *p,
                Move::Pass => PASS_WIRE,
            };
            out.extend_from_slice(&wire.to_le_bytes());
        }
        WorkerCommand::SetKomi(komi) => out.extend_from_slice(&komi.to_le_bytes()),
        WorkerCommand::SetProperty { key, value } => {
            put_str(out, key);
            put_str(out, value);
        }
        WorkerCommand::ApplyTotals { runs, wins } => put_totals(out, runs, wins),
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_totals(out: &mut Vec<u8>, runs: &[u32], wins: &[u32]) {
    for v in [runs, wins] {
        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
        for &x in v {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
}

pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let mut c = Cursor::new(bytes);

    let version = c.read_u32()?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::BadVersion(version));
    }
    let kind_byte = c.read_u8()?;
    let kind = MsgKind::from_u8(kind_byte).ok_or(DecodeError::BadKind(kind_byte))?;
    let _flags = c.read_u8()?;
    c.skip(2)?;
    let request_id = c.read_u64()?;

    let msg = match kind {
        MsgKind::AddWorker => Message::AddWorker {
            name: c.read_str()?,
            player: c.read_str()?,
        },
        MsgKind::AcceptResults => {
            let worker_id = c.read_u64()?;
            let search_id = c.read_u64()?;
            let complete = c.read_bool()?;
            let (runs, wins) = c.read_totals()?;
            Message::AcceptResults {
                worker_id,
                search_id,
                complete,
                runs,
                wins,
            }
        }
        MsgKind::RemoveWorker => Message::RemoveWorker {
            worker_id: c.read_u64()?,
        },
        MsgKind::Heartbeat => Message::Heartbeat {
            worker_id: c.read_u64()?,
        },
        MsgKind::Registered => Message::Registered {
            worker_id: c.read_u64()?,
        },
        MsgKind::Reply => Message::Reply {
            ok: c.read_bool()?,
            detail: c.read_str()?,
        },
        MsgKind::Command => Message::Command(decode_command(&mut c)?),
    };

    if c.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(c.remaining()));
    }
    Ok(Envelope { request_id, msg })
}

fn decode_command(c: &mut Cursor<'_>) -> Result<WorkerCommand, DecodeError> {
    let tag = c.read_u8()?;
    Ok(match tag {
        1 => WorkerCommand::Reset,
        2 => {
            let search_id = c.read_u64()?;
            let budget_tag = c.read_u8()?;
            let amount = c.read_u64()?;
            let budget = match budget_tag {
                BUDGET_PLAYOUTS => SearchBudget::Playouts(amount),
                BUDGET_MILLIS => SearchBudget::Millis(amount),
                other => return Err(DecodeError::BadBudget(other)),
            };
            WorkerCommand::BeginSearch { search_id, budget }
        }
        3 => {
            let turn = c.read_u32()?;
            let mv = match c.read_u16()? {
                PASS_WIRE => Move::Pass,
                p => Move::Play(p),
            };
            WorkerCommand::AcceptMove { turn, mv }
        }
        4 => WorkerCommand::SetKomi(c.read_f32()?),
        5 => WorkerCommand::SetProperty {
            key: c.read_str()?,
            value: c.read_str()?,
        },
        6 => WorkerCommand::GetPlayer,
        7 => WorkerCommand::StopSearch,
        8 => {
            let (runs, wins) = c.read_totals()?;
            WorkerCommand::ApplyTotals { runs, wins }
        }
        other => return Err(DecodeError::BadCommand(other)),
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, off: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.off
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::TooShort);
        }
        let s = &self.bytes[self.off..self.off + n];
        self.off += n;
        Ok(s)
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(DecodeError::BadBool(b)),
        }
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_f32(&mut self) -> Result<f32, DecodeError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| DecodeError::BadUtf8)
    }

    fn read_u32_vec(&mut self) -> Result<Vec<u32>, DecodeError> {
        let len = self.read_u32()? as usize;
        if len.saturating_mul(4) > self.remaining() {
            return Err(DecodeError::TooShort);
        }
        (0..len).map(|_| self.read_u32()).collect()
    }

    fn read_totals(&mut self) -> Result<(Vec<u32>, Vec<u32>), DecodeError> {
        let runs = self.read_u32_vec()?;
        let wins = self.read_u32_vec()?;
        if runs.len() != wins.len() {
            return Err(DecodeError::LengthMismatch {
                runs: runs.len() as u32,
                wins: wins.len() as u32,
            });
        }
        Ok((runs, wins))
    }
}
