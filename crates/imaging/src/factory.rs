//! Position source factory
//!
//! 根据 `ImagingConfig` 构建对应的 `PositionSource`。

use contracts::{ImagingConfig, ImagingSourceType, PositionSource};
use tracing::info;

use crate::error::{ImagingError, Result};
use crate::mock::MockPositionSource;
use crate::replay::ReplayPositionSource;

/// 构建位置源
pub fn build_position_source(config: &ImagingConfig) -> Result<Box<dyn PositionSource>> {
    let source: Box<dyn PositionSource> = match config.source {
        ImagingSourceType::Mock => Box::new(MockPositionSource::with_dropout(config.dropout_rate)),
        ImagingSourceType::Replay => {
            let path = config
                .replay_path
                .as_deref()
                .ok_or_else(|| ImagingError::ReplayLoad {
                    path: Default::default(),
                    message: "imaging.replay_path is required for the replay source".into(),
                })?;
            Box::new(ReplayPositionSource::load(path)?)
        }
    };

    info!(
        source = source.name(),
        sample_interval_s = config.sample_interval_s,
        "Position source ready"
    );
    Ok(source)
}
