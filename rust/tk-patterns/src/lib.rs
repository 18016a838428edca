//! tk-patterns: local shape statistics shared by every search thread.
//!
//! - `PatternHasher` turns the 12-point neighborhood of a point into a 64-bit
//!   fingerprint.
//! - `PatternValueTable` keeps a decaying win rate per fingerprint, split
//!   over several small sub-tables, and persists to a flat binary blob.

pub mod fingerprint;
pub mod table;

pub use fingerprint::{PatternHasher, NEIGHBORHOOD};
pub use table::{PatternError, PatternValueTable, TABLE_MAGIC, TABLE_VERSION};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
