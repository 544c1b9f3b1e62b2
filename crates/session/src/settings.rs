//! Resolved session timing and limits

use std::time::Duration;

use contracts::{ExperimentBlueprint, NodeConfigFrame};
use sync_engine::{AlignerConfig, ClockSyncConfig};

/// Everything a run and the orchestrator need, in engine units
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub num_runs: u32,
    pub run_time: Duration,
    pub lead_time: Duration,
    pub inter_run_delay: Duration,
    pub max_consecutive_errors: u32,

    /// Bounded wait of a single Transport read
    pub read_timeout: Duration,
    /// `ready` wait; re-armed with a warning when it lapses
    pub ready_timeout: Duration,
    pub reset_ack_timeout: Duration,

    /// Imaging sampling cadence
    pub sample_interval: Duration,
    /// Buffer eviction cadence
    pub cleanup_interval: Duration,

    pub sync: ClockSyncConfig,
    pub aligner: AlignerConfig,

    /// Sent once before the first run
    pub config_frame: Option<NodeConfigFrame>,
}

impl SessionSettings {
    pub fn from_blueprint(blueprint: &ExperimentBlueprint) -> Self {
        Self {
            num_runs: blueprint.runs.num_runs,
            run_time: secs(blueprint.runs.run_time_s),
            lead_time: secs(blueprint.runs.lead_time_s),
            inter_run_delay: secs(blueprint.runs.inter_run_delay_s),
            max_consecutive_errors: blueprint.runs.max_consecutive_errors.max(1),
            read_timeout: Duration::from_millis(blueprint.host.read_timeout_ms.max(1)),
            ready_timeout: secs(blueprint.handshake.ready_timeout_s),
            reset_ack_timeout: secs(blueprint.handshake.reset_ack_timeout_s),
            sample_interval: secs(blueprint.imaging.sample_interval_s),
            cleanup_interval: secs(blueprint.alignment.cleanup_interval_s),
            sync: ClockSyncConfig::from(&blueprint.handshake),
            aligner: AlignerConfig::from(&blueprint.alignment),
            config_frame: Some(blueprint.node_config_frame()),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_blueprint(&ExperimentBlueprint::default())
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
