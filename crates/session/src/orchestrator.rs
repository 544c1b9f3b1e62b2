//! Multi-run session over one Node connection
//!
//! 配置帧 → N 次运行 (每次独立的输出、缓冲与偏移) → 运行之间 reset 握手与间隔
//! → 收尾 (尽力发送 `stop`，释放成像源)。

use contracts::{AbortReason, HostClock, HostCommand, NodeMessage, PositionSource};
use dispatcher::OutputFactory;
use observability::{AlignmentMetricsAggregator, MetricsSummary};
use tracing::{debug, error, info, instrument, warn};
use transport::{NodeChannel, ReadOutcome};

use crate::cadence::Deadline;
use crate::error::{Result, SessionError};
use crate::run::{RunReport, RunSession, MIN_WAIT};
use crate::settings::SessionSettings;
use crate::stop::StopSignal;

/// Result of the between-runs reset handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Acked,
    /// No `reset_ack` in time; the next run proceeds anyway
    Missing,
    NodeStopped,
}

/// Why the session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// Every configured run was attempted
    Completed,
    ConnectionLost { message: String },
    NodeStopped,
    ManualStop,
}

impl SessionEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::Completed => "completed",
            SessionEnd::ConnectionLost { .. } => "connection_lost",
            SessionEnd::NodeStopped => "node_stopped",
            SessionEnd::ManualStop => "manual_stop",
        }
    }

    fn from_abort(reason: &AbortReason) -> Option<Self> {
        match reason {
            AbortReason::NodeStopped => Some(SessionEnd::NodeStopped),
            AbortReason::ManualStop => Some(SessionEnd::ManualStop),
            AbortReason::ConnectionLost { message } => Some(SessionEnd::ConnectionLost {
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// Everything the session did
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub runs: Vec<RunReport>,
    pub resets: Vec<ResetOutcome>,
    pub end: SessionEnd,
}

impl SessionReport {
    pub fn total_records(&self) -> u64 {
        self.runs.iter().map(RunReport::records).sum()
    }

    pub fn finished_runs(&self) -> usize {
        self.runs.iter().filter(|r| r.is_finished()).count()
    }

    /// Session-wide statistics
    pub fn summary(&self) -> MetricsSummary {
        let mut aggregator = AlignmentMetricsAggregator::new();
        for run in &self.runs {
            aggregator.merge(&run.alignment);
            aggregator.record_run(
                run.sync.map(|s| s.offset.millis()),
                run.sync.map(|s| s.rtt_s * 1000.0),
                run.outcome_label(),
            );
        }
        aggregator.summary()
    }
}

/// Drives `num_runs` runs over one channel
pub struct RunOrchestrator<C, K> {
    channel: C,
    clock: K,
    imaging: Box<dyn PositionSource>,
    outputs: OutputFactory,
    stop: StopSignal,
    settings: SessionSettings,
}

impl<C, K> RunOrchestrator<C, K>
where
    C: NodeChannel,
    K: HostClock,
{
    pub fn new(
        channel: C,
        clock: K,
        imaging: Box<dyn PositionSource>,
        outputs: OutputFactory,
        stop: StopSignal,
        settings: SessionSettings,
    ) -> Self {
        Self {
            channel,
            clock,
            imaging,
            outputs,
            stop,
            settings,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Run the whole session; teardown happens on every path
    #[instrument(name = "session", skip(self), fields(num_runs = self.settings.num_runs))]
    pub async fn run(&mut self) -> Result<SessionReport> {
        let mut runs = Vec::new();
        let mut resets = Vec::new();
        let result = self.drive(&mut runs, &mut resets).await;
        self.teardown().await;

        let end = match result {
            Ok(end) => end,
            Err(SessionError::ConnectionLost { message }) => {
                SessionEnd::ConnectionLost { message }
            }
            Err(e) => {
                error!(error = %e, runs = runs.len(), "Session failed");
                return Err(e);
            }
        };

        let report = SessionReport { runs, resets, end };
        info!(
            end = report.end.as_str(),
            runs = report.runs.len(),
            finished = report.finished_runs(),
            records = report.total_records(),
            "Session complete"
        );
        Ok(report)
    }

    async fn drive(
        &mut self,
        runs: &mut Vec<RunReport>,
        resets: &mut Vec<ResetOutcome>,
    ) -> Result<SessionEnd> {
        if let Some(frame) = &self.settings.config_frame {
            self.channel.send_config(frame).await?;
            info!(
                num_runs = frame.num_runs,
                channels = ?frame.channels,
                "Configuration sent to node"
            );
        }

        let num_runs = self.settings.num_runs;
        for run_index in 1..=num_runs {
            if self.stop.is_requested() {
                info!(run_index, "Stop requested, skipping remaining runs");
                return Ok(SessionEnd::ManualStop);
            }

            info!(run_index, num_runs, "Starting run");
            let output = self.outputs.open_run(run_index)?;
            let report = RunSession::new(
                run_index,
                &mut self.channel,
                &self.clock,
                self.imaging.as_mut(),
                &self.stop,
                &self.settings,
                output,
            )
            .run()
            .await?;

            observability::record_run_outcome(report.outcome_label());
            let end = report.abort_reason().and_then(SessionEnd::from_abort);
            runs.push(report);
            if let Some(end) = end {
                return Ok(end);
            }

            if run_index < num_runs {
                let reset = self.reset_node(run_index).await?;
                resets.push(reset);
                if reset == ResetOutcome::NodeStopped {
                    return Ok(SessionEnd::NodeStopped);
                }
                if !self.inter_run_delay().await {
                    return Ok(SessionEnd::ManualStop);
                }
            }
        }

        Ok(SessionEnd::Completed)
    }

    /// Send `reset` and wait for `reset_ack`, draining data frames
    #[instrument(name = "reset_node", skip(self))]
    async fn reset_node(&mut self, run_index: u32) -> Result<ResetOutcome> {
        self.channel.send(HostCommand::Reset).await?;
        let wait = Deadline::after(self.clock.now(), self.settings.reset_ack_timeout);
        let mut drained = 0u64;

        let outcome = loop {
            let now = self.clock.now();
            if wait.expired(now) {
                warn!(
                    run_index,
                    waited_s = self.settings.reset_ack_timeout.as_secs_f64(),
                    "No reset_ack from node, continuing"
                );
                break ResetOutcome::Missing;
            }

            let timeout = self.settings.read_timeout.min(wait.remaining(now)).max(MIN_WAIT);
            match self.channel.recv(timeout).await? {
                ReadOutcome::Message(NodeMessage::ResetAck) => break ResetOutcome::Acked,
                ReadOutcome::Message(NodeMessage::Stop) => break ResetOutcome::NodeStopped,
                ReadOutcome::Message(_) | ReadOutcome::Malformed { .. } => drained += 1,
                ReadOutcome::Idle => {}
            }
        };

        observability::record_reset(outcome == ResetOutcome::Acked);
        debug!(run_index, ?outcome, drained, "Reset handshake done");
        Ok(outcome)
    }

    /// Sleep between runs; `false` when a stop was requested meanwhile
    async fn inter_run_delay(&self) -> bool {
        let delay = Deadline::after(self.clock.now(), self.settings.inter_run_delay);
        loop {
            if self.stop.is_requested() {
                return false;
            }
            let now = self.clock.now();
            if delay.expired(now) {
                return true;
            }
            let step = self.settings.read_timeout.min(delay.remaining(now)).max(MIN_WAIT);
            tokio::time::sleep(step).await;
        }
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.channel.send(HostCommand::Stop).await {
            debug!(error = %e, "Could not send stop to node");
        }
        self.imaging.release();
        info!(source = self.imaging.name(), "Imaging source released");
    }
}
