//! Mock position source
//!
//! 生成确定性的合成轨迹 (匀速圆周运动)，可按比例随机丢失检测。

use contracts::{HostSample, HostTime, Position, PositionSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Mock 位置源配置
#[derive(Debug, Clone)]
pub struct MockPositionConfig {
    /// 源名称
    pub name: String,

    /// 轨迹圆心 (mm)
    pub center_mm: (f64, f64),

    /// 轨迹半径 (mm)
    pub radius_mm: f64,

    /// 角速度 (rad/s)
    pub angular_speed: f64,

    /// 丢失检测的比例 (0-1)
    pub dropout_rate: f64,

    /// 随机种子
    pub seed: u64,
}

impl Default for MockPositionConfig {
    fn default() -> Self {
        Self {
            name: "mock_tracker".to_string(),
            center_mm: (100.0, 100.0),
            radius_mm: 25.0,
            angular_speed: 0.5,
            dropout_rate: 0.0,
            seed: 7,
        }
    }
}

/// Mock 位置源
pub struct MockPositionSource {
    config: MockPositionConfig,
    rng: StdRng,
    origin: Option<HostTime>,
    samples: u64,
    dropped: u64,
}

impl MockPositionSource {
    pub fn new(config: MockPositionConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            origin: None,
            samples: 0,
            dropped: 0,
        }
    }

    /// Default trajectory with the given dropout rate
    pub fn with_dropout(dropout_rate: f64) -> Self {
        Self::new(MockPositionConfig {
            dropout_rate: dropout_rate.clamp(0.0, 1.0),
            ..Default::default()
        })
    }

    /// Position on the trajectory `t` seconds after the first sample
    pub fn position_at(&self, t: f64) -> Position {
        let angle = self.config.angular_speed * t;
        Position::planar(
            self.config.center_mm.0 + self.config.radius_mm * angle.cos(),
            self.config.center_mm.1 + self.config.radius_mm * angle.sin(),
        )
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl PositionSource for MockPositionSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn sample(&mut self, now: HostTime) -> HostSample {
        let origin = *self.origin.get_or_insert(now);
        self.samples += 1;

        let detected = self.config.dropout_rate <= 0.0
            || self.rng.random::<f64>() >= self.config.dropout_rate;
        let position = if detected {
            self.position_at(now - origin)
        } else {
            self.dropped += 1;
            Position::missing()
        };

        trace!(source = %self.config.name, detected, "Mock position sampled");
        HostSample {
            timestamp: now,
            position,
        }
    }

    fn release(&mut self) {
        self.origin = None;
    }
}
