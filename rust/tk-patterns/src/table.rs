//! Lock-free decaying win-rate table keyed by fingerprint.
//!
//! Blob layout (all little-endian):
//! `b"TKPV"`, `version: u32`, `sub_tables: u32`, `table_size: u32`,
//! `decay: f32`, then `sub_tables * table_size` `f32` cells, sub-table major.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tk_core::config::PatternsConfig;
use tracing::info;

pub const TABLE_MAGIC: [u8; 4] = *b"TKPV";
pub const TABLE_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;
const INITIAL_RATE: f32 = 0.5;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported table version {0}")]
    UnsupportedVersion(u32),
    #[error("table shape {found:?} does not match expected {expected:?}")]
    ShapeMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("table decay {found} does not match configured {expected}")]
    DecayMismatch { expected: f32, found: f32 },
    #[error("table truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("invalid table: {0}")]
    Invalid(String),
}

pub struct PatternValueTable {
    sub_tables: u32,
    bits: u32,
    decay: f32,
    cells: Vec<AtomicU32>,
}

impl PatternValueTable {
    /// Fresh table with every cell at 0.5.
    pub fn new(sub_tables: u32, bits_per_table: u32, decay: f32) -> Result<Self, PatternError> {
        check_shape(sub_tables, bits_per_table, decay)?;
        let n = sub_tables as usize * (1usize << bits_per_table);
        let cells = (0..n).map(|_| AtomicU32::new(INITIAL_RATE.to_bits())).collect();
        Ok(Self {
            sub_tables,
            bits: bits_per_table,
            decay,
            cells,
        })
    }

    /// Table described by the config; loads `cfg.path` when set. The stored
    /// shape and decay must both match the configured ones.
    pub fn from_config(cfg: &PatternsConfig) -> Result<Self, PatternError> {
        match &cfg.path {
            None => Self::new(cfg.sub_tables, cfg.bits_per_table, cfg.decay),
            Some(path) => {
                let t = Self::load(path)?;
                let expected = (cfg.sub_tables, 1u32 << cfg.bits_per_table);
                if t.shape() != expected {
                    return Err(PatternError::ShapeMismatch {
                        expected,
                        found: t.shape(),
                    });
                }
                if t.decay() != cfg.decay {
                    return Err(PatternError::DecayMismatch {
                        expected: cfg.decay,
                        found: t.decay(),
                    });
                }
                info!(path = %path.display(), "loaded pattern table");
                Ok(t)
            }
        }
    }

    /// `(sub_tables, table_size)`.
    pub fn shape(&self) -> (u32, u32) {
        (self.sub_tables, 1u32 << self.bits)
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    #[inline]
    fn slot(&self, fp: u64, i: u32) -> usize {
        let mask = (1u64 << self.bits) - 1;
        let idx = (fp >> (self.bits * i)) & mask;
        ((i as usize) << self.bits) + idx as usize
    }

    /// Mean rate over the sub-tables, in `[0, 1]`.
    pub fn lookup(&self, fp: u64) -> f32 {
        let sum: f32 = (0..self.sub_tables)
            .map(|i| f32::from_bits(self.cells[self.slot(fp, i)].load(Ordering::Relaxed)))
            .sum();
        sum / self.sub_tables as f32
    }

    /// Pull every sub-table cell for `fp` toward 1 (win) or 0 (loss).
    pub fn update(&self, fp: u64, win: bool) {
        let d = self.decay;
        let target = if win { 1.0 - d } else { 0.0 };
        for i in 0..self.sub_tables {
            let cell = &self.cells[self.slot(fp, i)];
            let mut cur = cell.load(Ordering::Relaxed);
            loop {
                let next = (f32::from_bits(cur) * d + target).clamp(0.0, 1.0);
                match cell.compare_exchange_weak(
                    cur,
                    next.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => cur = actual,
                }
            }
        }
    }

    /// Raw cell `idx` of sub-table `sub`.
    pub fn cell(&self, sub: u32, idx: u32) -> f32 {
        f32::from_bits(self.cells[((sub as usize) << self.bits) + idx as usize].load(Ordering::Relaxed))
    }

    /// Write the blob atomically (temp file + rename).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PatternError> {
        let path = path.as_ref();
        let mut buf = Vec::with_capacity(HEADER_LEN + self.cells.len() * 4);
        buf.extend_from_slice(&TABLE_MAGIC);
        buf.extend_from_slice(&TABLE_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.sub_tables.to_le_bytes());
        buf.extend_from_slice(&(1u32 << self.bits).to_le_bytes());
        buf.extend_from_slice(&self.decay.to_le_bytes());
        for c in &self.cells {
            buf.extend_from_slice(&c.load(Ordering::Relaxed).to_le_bytes());
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PatternError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PatternError> {
        if bytes.len() < HEADER_LEN {
            return Err(PatternError::Truncated {
                expected: HEADER_LEN,
                got: bytes.len(),
            });
        }
        let u32_at = |off: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&bytes[off..off + 4]);
            u32::from_le_bytes(b)
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != TABLE_MAGIC {
            return Err(PatternError::BadMagic(magic));
        }
        let version = u32_at(4);
        if version != TABLE_VERSION {
            return Err(PatternError::UnsupportedVersion(version));
        }
        let sub_tables = u32_at(8);
        let table_size = u32_at(12);
        let decay = f32::from_bits(u32_at(16));
        if !table_size.is_power_of_two() {
            return Err(PatternError::Invalid(format!(
                "table size {table_size} is not a power of two"
            )));
        }
        // Size the blob from its header before allocating anything.
        check_shape(sub_tables, table_size.trailing_zeros(), decay)?;
        let expected = (sub_tables as usize)
            .checked_mul(table_size as usize)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| {
                PatternError::Invalid(format!("{sub_tables} sub-tables of {table_size} cells"))
            })?;
        if bytes.len() < expected {
            return Err(PatternError::Truncated {
                expected,
                got: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(PatternError::Invalid(format!(
                "{} trailing bytes",
                bytes.len() - expected
            )));
        }
        let table = Self::new(sub_tables, table_size.trailing_zeros(), decay)?;
        for (i, cell) in table.cells.iter().enumerate() {
            let v = f32::from_bits(u32_at(HEADER_LEN + i * 4));
            if !(0.0..=1.0).contains(&v) {
                return Err(PatternError::Invalid(format!("cell {i} holds {v}")));
            }
            cell.store(v.to_bits(), Ordering::Relaxed);
        }
        Ok(table)
    }
}

fn check_shape(sub_tables: u32, bits_per_table: u32, decay: f32) -> Result<(), PatternError> {
    if sub_tables == 0 || !(1..=24).contains(&bits_per_table) {
        return Err(PatternError::Invalid(format!(
            "{sub_tables} sub-tables of {bits_per_table} bits"
        )));
    }
    if sub_tables.checked_mul(bits_per_table).map_or(true, |b| b > 64) {
        return Err(PatternError::Invalid(format!(
            "{sub_tables} x {bits_per_table} bits exceeds a 64-bit fingerprint"
        )));
    }
    if !(decay > 0.0 && decay < 1.0) {
        return Err(PatternError::Invalid(format!("decay {decay} not in (0,1)")));
    }
    Ok(())
}

impl std::fmt::Debug for PatternValueTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternValueTable")
            .field("shape", &self.shape())
            .field("decay", &self.decay)
            .finish()
    }
}
