//! Point-in-time snapshots of the key space.
//!
//! A snapshot is a single versioned binary file: padded header, serialized
//! entries, checksummed trailer. It is written atomically (temp file +
//! rename) so a crash mid-write never damages the previous snapshot, and
//! corruption is forward-detectable at load time.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::*;
pub use reader::*;
pub use writer::*;
