//! Sink implementations
//!
//! Contains CsvSink, LogSink, and MemorySink.

mod csv;
mod log;
mod memory;

pub use self::csv::{CsvSink, CsvSinkConfig};
pub use self::log::LogSink;
pub use self::memory::MemorySink;
