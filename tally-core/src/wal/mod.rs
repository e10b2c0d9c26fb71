//! Write-Ahead Log (WAL) implementation
//!
//! Every accepted mutation is appended to an in-memory buffer as a
//! checksummed frame and later flushed to the end of a single log file.
//! On restart the file is replayed front to back to rebuild the index.
//!
//! On-disk layout, repeated until end of file:
//!
//! ```text
//! [crc32 (4, BE)][op (1)][varint payload len][payload][0xB1]
//! ```

mod reader;
mod record;
mod writer;

pub use record::{Operation, WalRecord};
pub use writer::Wal;

/// Marker written after every frame
pub const SEPARATOR: u8 = 0xB1;
