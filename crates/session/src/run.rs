//! One run: handshake, clock sync, lead-in and the collection poll loop.
//!
//! Each poll iteration performs at most one bounded Transport read, samples the
//! imaging source when its cadence is due, aligns newly arrived Node samples,
//! evicts stale buffer entries when due, and checks the run deadline and the
//! stop flag.

use std::time::Duration;

use contracts::{
    is_sync_reply, AbortReason, AlignedRecord, ClockOffset, ContractError, HostClock, HostCommand,
    HostTime, NodeMessage, NodeSample, NodeTime, PositionSource, RunState,
};
use dispatcher::{OutputReport, RunOutput};
use observability::AlignmentMetricsAggregator;
use sync_engine::{Aligner, AlignerStats, ClockSyncEstimator, SyncError, SyncEstimate};
use tracing::{debug, info, instrument, trace, warn};
use transport::{NodeChannel, ReadOutcome, TransportError};

use crate::cadence::{Cadence, Deadline};
use crate::error::{Result, SessionError};
use crate::handshake::{HandshakeStateMachine, Transition};
use crate::settings::SessionSettings;
use crate::stop::StopSignal;

/// Shortest wait handed to a read or sleep, so virtual time always advances
pub(crate) const MIN_WAIT: Duration = Duration::from_millis(1);

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished,
    Aborted(AbortReason),
}

/// What happened during one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_index: u32,
    pub outcome: RunOutcome,
    /// Clock sync result, if the exchange succeeded
    pub sync: Option<SyncEstimate>,
    /// t=0 of `elapsed_ms`
    pub actuation_epoch: Option<HostTime>,
    /// Epoch came from the Node's `pulse_start_ts`
    pub pulse_start_seen: bool,
    pub aligner: AlignerStats,
    /// Node samples still unmatched when the run ended
    pub unmatched_at_end: usize,
    pub protocol_errors: u64,
    /// Data frames tagged with another run's index
    pub stale_dropped: u64,
    /// Data frames received before `trigger`
    pub discarded_before_trigger: u64,
    pub emit_failures: u64,
    /// Per-record statistics of what was emitted
    pub alignment: AlignmentMetricsAggregator,
    pub transitions: Vec<Transition>,
    pub output: OutputReport,
}

impl RunReport {
    pub fn is_finished(&self) -> bool {
        self.outcome == RunOutcome::Finished
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.outcome {
            RunOutcome::Aborted(reason) => Some(reason),
            RunOutcome::Finished => None,
        }
    }

    /// `finished` or the abort kind
    pub fn outcome_label(&self) -> &'static str {
        match &self.outcome {
            RunOutcome::Finished => "finished",
            RunOutcome::Aborted(reason) => reason.kind(),
        }
    }

    pub fn records(&self) -> u64 {
        self.aligner.records
    }
}

/// Why a phase stopped early
#[derive(Debug)]
enum Halt {
    Abort(AbortReason),
    Fatal(SessionError),
}

impl From<TransportError> for Halt {
    fn from(err: TransportError) -> Self {
        match SessionError::from(err) {
            SessionError::ConnectionLost { message } => {
                Halt::Abort(AbortReason::ConnectionLost { message })
            }
            other => Halt::Fatal(other),
        }
    }
}

impl From<SessionError> for Halt {
    fn from(err: SessionError) -> Self {
        Halt::Fatal(err)
    }
}

impl From<SyncError> for Halt {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::AttemptsExhausted { attempts } => {
                Halt::Abort(AbortReason::SyncRejected { attempts })
            }
            other => Halt::Fatal(SessionError::Sync(other)),
        }
    }
}

type Step<T> = std::result::Result<T, Halt>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    LeadIn,
    Collecting,
}

#[derive(Debug, Default)]
struct Counters {
    consecutive_errors: u32,
    protocol_errors: u64,
    stale_dropped: u64,
    discarded: u64,
    emit_failures: u64,
}

/// Drives a single run over a borrowed channel
pub struct RunSession<'a, C, K> {
    run_index: u32,
    channel: &'a mut C,
    clock: &'a K,
    imaging: &'a mut dyn PositionSource,
    stop: &'a StopSignal,
    settings: &'a SessionSettings,
    output: RunOutput,
    handshake: HandshakeStateMachine,
    sync: ClockSyncEstimator,
    aligner: Aligner,
    sample_cadence: Cadence,
    evict_cadence: Cadence,
    offset: Option<ClockOffset>,
    pulse_start_seen: bool,
    /// Records aligned while t=0 is still provisional
    held: Vec<AlignedRecord>,
    counters: Counters,
    alignment: AlignmentMetricsAggregator,
}

impl<'a, C, K> RunSession<'a, C, K>
where
    C: NodeChannel,
    K: HostClock,
{
    pub fn new(
        run_index: u32,
        channel: &'a mut C,
        clock: &'a K,
        imaging: &'a mut dyn PositionSource,
        stop: &'a StopSignal,
        settings: &'a SessionSettings,
        output: RunOutput,
    ) -> Self {
        Self {
            run_index,
            channel,
            clock,
            imaging,
            stop,
            settings,
            output,
            handshake: HandshakeStateMachine::new(run_index),
            sync: ClockSyncEstimator::new(settings.sync),
            aligner: Aligner::new(run_index, settings.aligner),
            sample_cadence: Cadence::new(settings.sample_interval),
            evict_cadence: Cadence::new(settings.cleanup_interval),
            offset: None,
            pulse_start_seen: false,
            held: Vec::new(),
            counters: Counters::default(),
            alignment: AlignmentMetricsAggregator::new(),
        }
    }

    /// Run to `Finished` or `Aborted`
    ///
    /// Aborts are reported in the returned [`RunReport`]; only faults that are
    /// not part of the run lifecycle come back as `Err`.
    #[instrument(name = "run_session", skip(self), fields(run_index = self.run_index))]
    pub async fn run(mut self) -> Result<RunReport> {
        let outcome = match self.drive().await {
            Ok(()) => RunOutcome::Finished,
            Err(Halt::Abort(reason)) => match self.handshake.abort(reason.clone(), self.clock.now()) {
                Ok(()) => RunOutcome::Aborted(reason),
                Err(e) => return self.fail(e).await,
            },
            Err(Halt::Fatal(e)) => return self.fail(e).await,
        };
        // no pulse start: the trigger time stays t=0
        self.release_held().await;

        let RunSession {
            run_index,
            output,
            handshake,
            sync,
            aligner,
            offset,
            pulse_start_seen,
            counters,
            alignment,
            ..
        } = self;

        let output = output.finish().await;
        let report = RunReport {
            run_index,
            outcome,
            sync: offset.and(sync.estimate().copied()),
            actuation_epoch: aligner.actuation_epoch(),
            pulse_start_seen,
            aligner: aligner.stats(),
            unmatched_at_end: aligner.pending_node(),
            protocol_errors: counters.protocol_errors,
            stale_dropped: counters.stale_dropped,
            discarded_before_trigger: counters.discarded,
            emit_failures: counters.emit_failures,
            alignment,
            transitions: handshake.history().to_vec(),
            output,
        };

        info!(
            run_index,
            outcome = report.outcome_label(),
            records = report.records(),
            unmatched = report.unmatched_at_end,
            protocol_errors = report.protocol_errors,
            "Run complete"
        );
        Ok(report)
    }

    async fn fail(self, err: SessionError) -> Result<RunReport> {
        let _ = self.output.finish().await;
        Err(err)
    }

    async fn drive(&mut self) -> Step<()> {
        self.check_stop()?;

        self.channel.send(HostCommand::Start).await?;
        self.advance(RunState::AwaitingReady)?;
        self.await_ready().await?;

        self.advance(RunState::Syncing)?;
        let estimate = self.clock_sync().await?;
        self.offset = Some(estimate.offset);

        self.advance(RunState::LeadIn)?;
        let lead_end = Deadline::after(self.clock.now(), self.settings.lead_time);
        self.poll_until(lead_end, Phase::LeadIn).await?;

        let t_trigger = self.clock.now();
        self.channel.send(HostCommand::Trigger).await?;
        self.aligner.set_actuation_epoch(t_trigger);
        self.advance(RunState::Collecting)?;

        let run_end = Deadline::after(t_trigger, self.settings.run_time);
        self.poll_until(run_end, Phase::Collecting).await?;

        self.advance(RunState::Finished)?;
        Ok(())
    }

    fn advance(&mut self, to: RunState) -> Step<()> {
        self.handshake.advance(to, self.clock.now())?;
        Ok(())
    }

    fn check_stop(&self) -> Step<()> {
        if self.stop.is_requested() {
            return Err(Halt::Abort(AbortReason::ManualStop));
        }
        Ok(())
    }

    /// Wait for `ready`; a lapsed wait is logged and re-armed
    async fn await_ready(&mut self) -> Step<()> {
        let mut wait = Deadline::after(self.clock.now(), self.settings.ready_timeout);
        loop {
            self.check_stop()?;
            let now = self.clock.now();
            if wait.expired(now) {
                warn!(
                    run_index = self.run_index,
                    waited_s = self.settings.ready_timeout.as_secs_f64(),
                    "Node not ready yet, still waiting"
                );
                metrics::counter!("sync_host_ready_timeouts_total").increment(1);
                wait = Deadline::after(now, self.settings.ready_timeout);
            }

            let timeout = self.settings.read_timeout.min(wait.remaining(now)).max(MIN_WAIT);
            match self.read(timeout).await? {
                Some(NodeMessage::Ready) => return Ok(()),
                Some(NodeMessage::Stop) => return Err(Halt::Abort(AbortReason::NodeStopped)),
                Some(other) => self.ignore(&other),
                None => {}
            }
        }
    }

    /// `sync` / `sync_ts` exchange with resend on malformed replies
    async fn clock_sync(&mut self) -> Step<SyncEstimate> {
        self.send_sync().await?;
        loop {
            self.check_stop()?;
            let now = self.clock.now();
            if self.sync.deadline_passed(now) {
                return Err(Halt::Abort(AbortReason::SyncTimeout {
                    waited_s: self.sync.timeout().as_secs_f64(),
                }));
            }

            let timeout = self.settings.read_timeout.min(self.sync.remaining(now)).max(MIN_WAIT);
            match self.channel.recv(timeout).await? {
                ReadOutcome::Idle => {}
                ReadOutcome::Message(NodeMessage::SyncTs(t_node)) => {
                    self.counters.consecutive_errors = 0;
                    let t_recv = self.clock.now();
                    return Ok(self.sync.on_reply(t_node, t_recv)?);
                }
                ReadOutcome::Message(NodeMessage::Stop) => {
                    return Err(Halt::Abort(AbortReason::NodeStopped));
                }
                ReadOutcome::Message(other) => {
                    self.counters.consecutive_errors = 0;
                    self.ignore(&other);
                }
                ReadOutcome::Malformed { frame, .. } if is_sync_reply(&frame) => {
                    self.sync.on_malformed(&frame)?;
                    self.send_sync().await?;
                }
                ReadOutcome::Malformed { frame, error } => self.protocol_error(&frame, &error)?,
            }
        }
    }

    /// Send `sync` and capture one Host sample at the send instant
    async fn send_sync(&mut self) -> Step<()> {
        let t_send = self.clock.now();
        let attempt = self.sync.begin_attempt(t_send)?;
        let sample = self.imaging.sample(t_send);
        self.aligner.push_host(sample);
        self.channel.send(HostCommand::Sync).await?;
        debug!(run_index = self.run_index, attempt, "Sync sent");
        Ok(())
    }

    /// Poll loop shared by lead-in and collection
    async fn poll_until(&mut self, deadline: Deadline, phase: Phase) -> Step<()> {
        loop {
            let now = self.clock.now();
            let timeout = self.next_wait(now, &deadline);
            if let Some(message) = self.read(timeout).await? {
                self.on_message(message, phase).await?;
            }

            let now = self.clock.now();
            if self.sample_cadence.due(now) {
                let sample = self.imaging.sample(now);
                self.aligner.push_host(sample);
            }
            if self.evict_cadence.due(now) {
                self.aligner.evict(now);
            }

            self.check_stop()?;
            if deadline.expired(now) {
                return Ok(());
            }
        }
    }

    fn next_wait(&self, now: HostTime, deadline: &Deadline) -> Duration {
        self.settings
            .read_timeout
            .min(self.sample_cadence.until_due(now))
            .min(self.evict_cadence.until_due(now))
            .min(deadline.remaining(now))
            .max(MIN_WAIT)
    }

    /// One bounded read; malformed frames count toward the error threshold
    async fn read(&mut self, timeout: Duration) -> Step<Option<NodeMessage>> {
        match self.channel.recv(timeout).await? {
            ReadOutcome::Idle => Ok(None),
            ReadOutcome::Message(message) => {
                self.counters.consecutive_errors = 0;
                Ok(Some(message))
            }
            ReadOutcome::Malformed { frame, error } => {
                self.protocol_error(&frame, &error)?;
                Ok(None)
            }
        }
    }

    fn protocol_error(&mut self, frame: &str, error: &ContractError) -> Step<()> {
        self.counters.consecutive_errors += 1;
        self.counters.protocol_errors += 1;
        warn!(
            run_index = self.run_index,
            state = %self.handshake.state(),
            frame = %frame,
            error = %error,
            consecutive = self.counters.consecutive_errors,
            "Dropping malformed frame"
        );

        let limit = self.settings.max_consecutive_errors;
        if self.counters.consecutive_errors >= limit {
            return Err(Halt::Abort(AbortReason::ProtocolErrors { consecutive: limit }));
        }
        Ok(())
    }

    fn ignore(&self, message: &NodeMessage) {
        debug!(
            run_index = self.run_index,
            state = %self.handshake.state(),
            kind = message.kind(),
            "Ignoring frame"
        );
    }

    async fn on_message(&mut self, message: NodeMessage, phase: Phase) -> Step<()> {
        match (message, phase) {
            (NodeMessage::Stop, _) => return Err(Halt::Abort(AbortReason::NodeStopped)),
            (NodeMessage::Data(_), Phase::LeadIn) => {
                self.counters.discarded += 1;
                trace!(run_index = self.run_index, "Discarding data before trigger");
            }
            (NodeMessage::Data(packet), Phase::Collecting) => {
                self.on_sample(NodeSample::from(packet)).await;
            }
            (NodeMessage::PulseStart(t), Phase::Collecting) => self.on_pulse_start(t).await,
            (other, _) => self.ignore(&other),
        }
        Ok(())
    }

    async fn on_sample(&mut self, sample: NodeSample) {
        if let Some(tagged) = sample.run_index {
            if tagged != self.run_index {
                self.counters.stale_dropped += 1;
                metrics::counter!("sync_host_stale_samples_total").increment(1);
                debug!(
                    run_index = self.run_index,
                    tagged,
                    "Dropping sample from another run"
                );
                return;
            }
        }
        let Some(offset) = self.offset else {
            return;
        };

        let records = self.aligner.push_node(sample.corrected(&offset));
        if self.pulse_start_seen {
            for record in records {
                self.deliver(record).await;
            }
        } else {
            self.held.extend(records);
        }
    }

    async fn deliver(&mut self, record: AlignedRecord) {
        self.alignment.update(&record);
        observability::record_aligned(&record);
        if let Err(e) = self.output.emit(record).await {
            self.counters.emit_failures += 1;
            warn!(run_index = self.run_index, error = %e, "Record not delivered to output");
        }
    }

    /// Emit held records against the final epoch
    async fn release_held(&mut self) {
        let Some(epoch) = self.aligner.actuation_epoch() else {
            return;
        };
        let held = std::mem::take(&mut self.held);
        if !held.is_empty() {
            debug!(
                run_index = self.run_index,
                records = held.len(),
                epoch = epoch.secs(),
                "Releasing held records"
            );
        }
        for mut record in held {
            record.elapsed_ms = (record.node_time - epoch) * 1000.0;
            self.deliver(record).await;
        }
    }

    /// The first `pulse_start_ts` fixes t=0 at the Node's actuation start
    ///
    /// Until then records are held back, so one run never mixes two epochs.
    async fn on_pulse_start(&mut self, t: NodeTime) {
        let Some(offset) = self.offset else {
            return;
        };
        if self.pulse_start_seen {
            debug!(run_index = self.run_index, "Repeated pulse start ignored");
            return;
        }
        self.pulse_start_seen = true;
        let epoch = offset.correct(t);
        info!(
            run_index = self.run_index,
            epoch = epoch.secs(),
            "Actuation start reported by node"
        );
        self.aligner.set_actuation_epoch(epoch);
        self.release_held().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{data_line, fast_settings, open_output, ScriptedChannel};
    use contracts::HostCommand::*;
    use imaging::{MockPositionConfig, MockPositionSource};
    use transport::TokioWallClock;

    const SKEW: f64 = 0.5;

    fn node(now: HostTime, ahead_of_host_s: f64) -> f64 {
        now.secs() + SKEW + ahead_of_host_s
    }

    /// Answers every step of a run; `on_trigger` supplies the collection frames
    fn happy_script(
        mut on_trigger: impl FnMut(HostTime) -> Vec<String> + Send + 'static,
    ) -> impl FnMut(HostCommand, HostTime) -> Vec<String> + Send + 'static {
        move |command, now| match command {
            Start => vec!["ready".into()],
            Sync => vec![format!("sync_ts:{}", node(now, 0.0))],
            Trigger => on_trigger(now),
            Reset => vec!["reset_ack".into()],
            Stop => vec![],
        }
    }

    async fn run_one(
        channel: &mut ScriptedChannel,
        clock: &TokioWallClock,
        settings: &SessionSettings,
        stop: &StopSignal,
    ) -> (RunReport, Vec<contracts::AlignedRecord>) {
        let mut imaging = MockPositionSource::new(MockPositionConfig::default());
        let (output, sink) = open_output(1);
        let report = RunSession::new(1, channel, clock, &mut imaging, stop, settings, output)
            .run()
            .await
            .unwrap();
        (report, sink.records())
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_aligns_and_uses_pulse_start_as_epoch() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(
            clock,
            happy_script(|now| {
                vec![
                    format!("pulse_start_ts:{}", node(now, 0.1)),
                    data_line(node(now, 0.2), 30.0, Some(1)),
                    data_line(node(now, 0.25), 30.5, Some(1)),
                    data_line(node(now, 0.3), 31.0, Some(2)),
                ]
            }),
        );
        let settings = fast_settings();
        let (report, records) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(report.is_finished());
        assert_eq!(report.outcome_label(), "finished");
        assert!(report.pulse_start_seen);
        assert_eq!(report.stale_dropped, 1);
        assert_eq!(report.records(), 2);
        assert_eq!(report.output.records, 2);
        assert_eq!(report.alignment.total_records, 2);

        let sync = report.sync.unwrap();
        assert!((sync.offset.millis() - 500.0).abs() < 1e-6);

        assert_eq!(records.len(), 2);
        assert!((records[0].elapsed_ms - 100.0).abs() < 1e-6);
        assert!((records[1].elapsed_ms - 150.0).abs() < 1e-6);
        assert!(records.iter().all(|r| r.run_index == 1 && r.delta_ms <= 400.0));

        assert_eq!(channel.sent, vec![Start, Sync, Trigger]);
        let states: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                RunState::AwaitingReady,
                RunState::Syncing,
                RunState::LeadIn,
                RunState::Collecting,
                RunState::Finished,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_time_is_epoch_without_pulse_start() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(
            clock,
            happy_script(|now| vec![data_line(node(now, 0.05), 25.0, None)]),
        );
        let settings = fast_settings();
        let (report, records) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(!report.pulse_start_seen);
        assert_eq!(records.len(), 1);
        assert!((records[0].elapsed_ms - 50.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_ahead_of_pulse_start_shares_its_epoch() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(
            clock,
            happy_script(|now| {
                vec![
                    data_line(node(now, 0.05), 25.0, Some(1)),
                    format!("pulse_start_ts:{}", node(now, 0.1)),
                    data_line(node(now, 0.12), 25.5, Some(1)),
                ]
            }),
        );
        let settings = fast_settings();
        let (report, records) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(report.is_finished());
        assert!(report.pulse_start_seen);
        assert_eq!(records.len(), 2);
        let elapsed: Vec<f64> = records.iter().map(|r| r.elapsed_ms).collect();
        assert!((elapsed[0] + 50.0).abs() < 1e-6, "{elapsed:?}");
        assert!((elapsed[1] - 20.0).abs() < 1e-6, "{elapsed:?}");
        assert!(elapsed.windows(2).all(|w| w[0] <= w[1]));

        let epoch = report.actuation_epoch.unwrap();
        for record in &records {
            let expected = (record.node_time - epoch) * 1000.0;
            assert!((record.elapsed_ms - expected).abs() < 1e-6);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_gap_aborts_with_timeout() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(clock, |command, _| match command {
            Start => vec!["ready".into()],
            _ => vec![],
        });
        channel.deliver_after(Duration::from_secs(12), "sync_ts:1012.5");

        let settings = fast_settings();
        let started = clock.now();
        let (report, records) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert_eq!(
            report.abort_reason(),
            Some(&AbortReason::SyncTimeout { waited_s: 10.0 })
        );
        assert!(report.sync.is_none());
        assert!(records.is_empty());
        assert_eq!(channel.count(Sync), 1);
        assert_eq!(channel.count(Trigger), 0);
        assert!(clock.now() - started >= 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_sync_replies_exhaust_attempts() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(clock, |command, _| match command {
            Start => vec!["ready".into()],
            Sync => vec!["sync_ts:garbled".into()],
            _ => vec![],
        });
        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert_eq!(
            report.abort_reason(),
            Some(&AbortReason::SyncRejected { attempts: 3 })
        );
        assert_eq!(channel.count(Sync), 3);
        assert_eq!(report.protocol_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_malformed_sync_reply_is_retried() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut syncs = 0;
        let mut channel = ScriptedChannel::new(clock, move |command, now| match command {
            Start => vec!["ready".into()],
            Sync => {
                syncs += 1;
                if syncs == 1 {
                    vec!["sync_ts:".into()]
                } else {
                    vec![format!("sync_ts:{}", node(now, 0.0))]
                }
            }
            _ => vec![],
        });
        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(report.is_finished());
        assert_eq!(report.sync.map(|s| s.attempts), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_garbage_aborts_run() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(
            clock,
            happy_script(|_| vec!["{garbage".to_string(); 10]),
        );
        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert_eq!(
            report.abort_reason(),
            Some(&AbortReason::ProtocolErrors { consecutive: 10 })
        );
        assert_eq!(report.protocol_errors, 10);
        assert_eq!(report.transitions.last().map(|t| t.to), Some(RunState::Aborted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_well_formed_frame_resets_error_streak() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(
            clock,
            happy_script(|now| {
                let mut lines = vec!["{garbage".to_string(); 9];
                lines.push(data_line(node(now, 0.05), 25.0, Some(1)));
                lines.extend(vec!["nonsense".to_string(); 9]);
                lines
            }),
        );
        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(report.is_finished());
        assert_eq!(report.protocol_errors, 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_stop_while_waiting_for_ready() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(clock, |command, _| match command {
            Start => vec!["stop".into()],
            _ => vec![],
        });
        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert_eq!(report.abort_reason(), Some(&AbortReason::NodeStopped));
        assert_eq!(channel.sent, vec![Start]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ready_rearms_wait() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(clock, |command, now| match command {
            Sync => vec![format!("sync_ts:{}", node(now, 0.0))],
            _ => vec![],
        });
        channel.deliver_after(Duration::from_secs(25), "ready");

        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(report.is_finished());
        let syncing = &report.transitions[1];
        assert_eq!(syncing.to, RunState::Syncing);
        assert!(syncing.at - report.transitions[0].at >= 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_stop_before_start() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(clock, happy_script(|_| vec![]));
        let stop = StopSignal::new();
        stop.request();

        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &stop).await;

        assert_eq!(report.abort_reason(), Some(&AbortReason::ManualStop));
        assert!(channel.sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_before_trigger_is_discarded() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(clock, |command, now| match command {
            Start => vec!["ready".into()],
            Sync => vec![
                format!("sync_ts:{}", node(now, 0.0)),
                data_line(node(now, 0.0), 22.0, Some(1)),
            ],
            _ => vec![],
        });
        let settings = fast_settings();
        let (report, records) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(report.is_finished());
        assert_eq!(report.discarded_before_trigger, 1);
        assert!(records.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_aborts_run() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(clock, happy_script(|_| vec![]));
        channel.hang_up_when_empty = true;

        let settings = fast_settings();
        let (report, _) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        let reason = report.abort_reason().cloned().unwrap();
        assert_eq!(reason.kind(), "connection_lost");
        assert!(reason.ends_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_node_sample_stays_pending() {
        let clock = TokioWallClock::anchored_at(1000.0);
        let mut channel = ScriptedChannel::new(
            clock,
            // far ahead of every Host sample taken so far
            happy_script(|now| vec![data_line(node(now, 0.9), 25.0, Some(1))]),
        );
        let mut settings = fast_settings();
        settings.aligner.retention_s = 60.0;
        let (report, records) = run_one(&mut channel, &clock, &settings, &StopSignal::new()).await;

        assert!(report.is_finished());
        assert!(records.is_empty());
        assert_eq!(report.unmatched_at_end, 1);
    }
}
