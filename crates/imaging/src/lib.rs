//! # Imaging
//!
//! Host 端位置数据源。
//!
//! - `MockPositionSource`: 合成轨迹，可配置丢失检测比例
//! - `ReplayPositionSource`: 回放 JSONL 录制
//! - `build_position_source`: 按配置构建

pub mod error;
pub mod factory;
pub mod mock;
pub mod replay;

pub use contracts::PositionSource;
pub use error::{ImagingError, Result};
pub use factory::build_position_source;
pub use mock::{MockPositionConfig, MockPositionSource};
pub use replay::{PositionRecord, ReplayPositionSource};
