//! # Sync Engine
//!
//! Host 侧双流同步核心。
//!
//! 负责：
//! - `StreamBuffer<T>`：有界、按时间排序的缓冲
//! - `ClockSyncEstimator`：单次往返的 Node−Host 时钟偏移估计
//! - `Aligner`：以 Node 样本到达为触发的最近邻对齐，输出 `AlignedRecord`
//!
//! ## 使用示例
//!
//! ```
//! use contracts::{ClockOffset, HostSample, HostTime, NodeSample, NodeTime, Position};
//! use sync_engine::{Aligner, AlignerConfig};
//!
//! let mut aligner = Aligner::new(1, AlignerConfig::default());
//! aligner.set_actuation_epoch(HostTime(99.0));
//! aligner.push_host(HostSample {
//!     timestamp: HostTime(100.1),
//!     position: Position::planar(3.0, 4.0),
//! });
//!
//! let offset = ClockOffset::from_secs(2.0);
//! let sample = NodeSample {
//!     timestamp: NodeTime(102.0),
//!     channels: Default::default(),
//!     actuator_active: true,
//!     run_index: Some(1),
//! };
//! let records = aligner.push_node(sample.corrected(&offset));
//! assert_eq!(records.len(), 1);
//! ```

mod aligner;
mod buffer;
mod clock_sync;
mod error;

pub use aligner::{Aligner, AlignerConfig, AlignerStats, Eviction};
pub use buffer::{Nearest, StreamBuffer};
pub use clock_sync::{ClockSyncConfig, ClockSyncEstimator, SyncEstimate};
pub use error::SyncError;

// Re-export contracts types
pub use contracts::{AlignedRecord, ClockOffset, CorrectedNodeSample, HostSample, HostTime};
