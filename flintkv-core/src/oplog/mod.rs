//! Append-only operation log.
//!
//! Every mutating command is appended after it is applied, in application
//! order, as a self-delimiting record with a CRC32 checksum. The log is one
//! of the two independent durability paths; it is periodically rewritten
//! against the live key space and replayed at startup recovery.

pub mod reader;
pub mod record;
pub mod replay;
pub mod writer;

pub use reader::*;
pub use record::*;
pub use replay::*;
pub use writer::*;
