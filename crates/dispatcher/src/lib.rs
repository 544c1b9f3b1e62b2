//! # Dispatcher
//!
//! 数据分发模块。
//!
//! 负责：
//! - 每次运行打开一组新的 sink (CSV 文件、日志)
//! - Fan-out `AlignedRecord` 到多个 sinks
//! - 隔离慢 sink，不阻塞采集循环

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{AlignedRecord, RecordSink};
pub use dispatcher::{Dispatcher, OutputFactory, OutputReport, RunOutput, SinkProvider};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{Delivery, MetricsSnapshot, SinkMetrics};
pub use sinks::{CsvSink, CsvSinkConfig, LogSink, MemorySink};
