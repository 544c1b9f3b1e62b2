//! Scripted Node channel and helpers shared by the session tests

use std::collections::VecDeque;
use std::time::Duration;

use contracts::{HostClock, HostCommand, HostTime, NodeConfigFrame, NodeMessage};
use dispatcher::{MemorySink, OutputFactory, RunOutput, SinkHandle};
use transport::{NodeChannel, ReadOutcome, TokioWallClock, TransportError};

use crate::settings::SessionSettings;

pub(crate) type Script = Box<dyn FnMut(HostCommand, HostTime) -> Vec<String> + Send>;

/// Answers each command with the lines a script returns
///
/// An empty inbox sleeps for the full read timeout and yields `Idle`, so
/// paused time advances the same way it would with a silent Node.
pub(crate) struct ScriptedChannel {
    clock: TokioWallClock,
    script: Script,
    inbox: VecDeque<String>,
    delayed: VecDeque<(HostTime, String)>,
    pub sent: Vec<HostCommand>,
    pub configs: Vec<NodeConfigFrame>,
    /// Fail every read with a connection loss once the inbox drains
    pub hang_up_when_empty: bool,
}

impl ScriptedChannel {
    pub fn new(
        clock: TokioWallClock,
        script: impl FnMut(HostCommand, HostTime) -> Vec<String> + Send + 'static,
    ) -> Self {
        Self {
            clock,
            script: Box::new(script),
            inbox: VecDeque::new(),
            delayed: VecDeque::new(),
            sent: Vec::new(),
            configs: Vec::new(),
            hang_up_when_empty: false,
        }
    }

    /// Queue a line that becomes readable `delay` from now
    pub fn deliver_after(&mut self, delay: Duration, line: impl Into<String>) {
        let due = HostTime(self.clock.now().secs() + delay.as_secs_f64());
        self.delayed.push_back((due, line.into()));
    }

    pub fn count(&self, command: HostCommand) -> usize {
        self.sent.iter().filter(|c| **c == command).count()
    }
}

impl NodeChannel for ScriptedChannel {
    async fn send_config(&mut self, config: &NodeConfigFrame) -> transport::Result<()> {
        self.configs.push(config.clone());
        Ok(())
    }

    async fn send(&mut self, command: HostCommand) -> transport::Result<()> {
        self.sent.push(command);
        let lines = (self.script)(command, self.clock.now());
        self.inbox.extend(lines);
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> transport::Result<ReadOutcome> {
        let now = self.clock.now();
        if self.inbox.is_empty() {
            if let Some((due, _)) = self.delayed.front() {
                if *due <= now {
                    if let Some((_, line)) = self.delayed.pop_front() {
                        self.inbox.push_back(line);
                    }
                }
            }
        }

        let Some(line) = self.inbox.pop_front() else {
            if self.hang_up_when_empty && self.delayed.is_empty() {
                return Err(TransportError::connection_lost("scripted hang-up"));
            }
            let wait = match self.delayed.front() {
                Some((due, _)) => timeout.min(Duration::from_secs_f64((*due - now).max(0.0))),
                None => timeout,
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
            return Ok(ReadOutcome::Idle);
        };
        Ok(match NodeMessage::parse(&line) {
            Ok(message) => ReadOutcome::Message(message),
            Err(error) => ReadOutcome::Malformed { frame: line, error },
        })
    }
}

/// Short runs with a fast imaging cadence
pub(crate) fn fast_settings() -> SessionSettings {
    let mut settings = SessionSettings::default();
    settings.num_runs = 2;
    settings.run_time = Duration::from_secs(1);
    settings.lead_time = Duration::from_millis(500);
    settings.inter_run_delay = Duration::from_millis(200);
    settings.sample_interval = Duration::from_millis(100);
    if let Some(frame) = settings.config_frame.as_mut() {
        frame.num_runs = settings.num_runs;
        frame.run_time = settings.run_time.as_secs_f64();
        frame.lead_time = settings.lead_time.as_secs_f64();
    }
    settings
}

/// Output factory that collects every run into one memory sink
pub(crate) fn memory_outputs() -> (OutputFactory, MemorySink) {
    let sink = MemorySink::new("memory");
    let shared = sink.clone();
    let factory = OutputFactory::custom(move |_| vec![SinkHandle::spawn(shared.clone(), 64)]);
    (factory, sink)
}

pub(crate) fn open_output(run_index: u32) -> (RunOutput, MemorySink) {
    let (factory, sink) = memory_outputs();
    match factory.open_run(run_index) {
        Ok(output) => (output, sink),
        Err(e) => panic!("memory output failed to open: {e}"),
    }
}

/// Data frame line for channel 0
pub(crate) fn data_line(node_time: f64, temp_c: f64, run_index: Option<u32>) -> String {
    let run = run_index.map_or(String::new(), |r| format!(r#","run_index":{r}"#));
    format!(r#"{{"timestamp":{node_time},"temperatures_C":{{"ch0":{temp_c}}},"sma_active":true{run}}}"#)
}
