//! Dispatcher - per-run fan-out of aligned records to sinks
//!
//! 每次运行打开一组新的 sink (例如每次运行一个 CSV 文件)。记录经有界
//! 通道送入 dispatcher 任务，再分发给各 sink 的独立 worker，慢 sink
//! 不会阻塞采集循环。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use contracts::{AlignedRecord, ExperimentConfig, SinkConfig, SinkType, channel_key};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{CsvSink, CsvSinkConfig, LogSink};

/// Extra sinks attached to every run (for embedding and tests)
pub type SinkProvider = Arc<dyn Fn(u32) -> Vec<SinkHandle> + Send + Sync>;

/// Opens the sink set of each run
#[derive(Clone)]
pub struct OutputFactory {
    sinks: Vec<SinkConfig>,
    experiment: ExperimentConfig,
    channels: Vec<String>,
    input_capacity: usize,
    provider: Option<SinkProvider>,
}

impl OutputFactory {
    /// Build from the experiment settings and configured channel ids
    pub fn new(sinks: Vec<SinkConfig>, experiment: ExperimentConfig, channels: &[u8]) -> Self {
        Self {
            sinks,
            experiment,
            channels: channels.iter().map(|c| channel_key(*c)).collect(),
            input_capacity: 256,
            provider: None,
        }
    }

    /// Factory that opens only the sinks returned by `provider`
    pub fn custom(provider: impl Fn(u32) -> Vec<SinkHandle> + Send + Sync + 'static) -> Self {
        Self {
            sinks: Vec::new(),
            experiment: ExperimentConfig::default(),
            channels: Vec::new(),
            input_capacity: 256,
            provider: Some(Arc::new(provider)),
        }
    }

    /// Also attach the sinks returned by `provider`
    pub fn with_provider(
        mut self,
        provider: impl Fn(u32) -> Vec<SinkHandle> + Send + Sync + 'static,
    ) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// CSV path for a run
    pub fn run_path(&self, sink: &SinkConfig, run_index: u32) -> PathBuf {
        let dir = sink
            .params
            .get("output_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.experiment.output_dir.clone());
        dir.join(self.experiment.run_file_name(run_index))
    }

    /// Open a fresh sink set for `run_index` and start dispatching
    #[instrument(
        name = "output_open_run",
        skip(self),
        fields(sinks = self.sinks.len())
    )]
    pub fn open_run(&self, run_index: u32) -> Result<RunOutput, DispatcherError> {
        let mut handles = Vec::with_capacity(self.sinks.len());
        for sink_config in &self.sinks {
            handles.push(self.create_sink_handle(sink_config, run_index)?);
        }
        if let Some(provider) = &self.provider {
            handles.extend(provider(run_index));
        }

        let (tx, rx) = mpsc::channel(self.input_capacity);
        let task = Dispatcher::with_handles(run_index, handles, rx).spawn();
        Ok(RunOutput {
            run_index,
            tx,
            task,
            emitted: 0,
        })
    }

    fn create_sink_handle(
        &self,
        config: &SinkConfig,
        run_index: u32,
    ) -> Result<SinkHandle, DispatcherError> {
        match config.sink_type {
            SinkType::Log => Ok(SinkHandle::spawn(
                LogSink::new(&config.name),
                config.queue_capacity,
            )),
            SinkType::Csv => {
                let path = self.run_path(config, run_index);
                let csv = CsvSinkConfig {
                    path: path.clone(),
                    channels: self.channels.clone(),
                };
                let sink = CsvSink::create(&config.name, csv).map_err(|e| {
                    DispatcherError::sink_open(&config.name, run_index, path, e.to_string())
                })?;
                Ok(SinkHandle::spawn(sink, config.queue_capacity))
            }
        }
    }
}

/// Writer side of one run's output
pub struct RunOutput {
    run_index: u32,
    tx: mpsc::Sender<AlignedRecord>,
    task: JoinHandle<OutputReport>,
    emitted: u64,
}

impl RunOutput {
    pub fn run_index(&self) -> u32 {
        self.run_index
    }

    /// Number of records handed to the dispatcher
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Hand one record to the dispatcher
    pub async fn emit(&mut self, record: AlignedRecord) -> Result<(), DispatcherError> {
        self.tx
            .send(record)
            .await
            .map_err(|_| DispatcherError::Closed {
                run_index: self.run_index,
            })?;
        self.emitted += 1;
        Ok(())
    }

    /// Close the input, drain every sink and collect its counters
    pub async fn finish(self) -> OutputReport {
        drop(self.tx);
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(run_index = self.run_index, error = ?e, "Dispatcher task failed");
                OutputReport {
                    run_index: self.run_index,
                    records: self.emitted,
                    sinks: Vec::new(),
                }
            }
        }
    }
}

/// Per-run output summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputReport {
    pub run_index: u32,
    pub records: u64,
    pub sinks: Vec<(String, MetricsSnapshot)>,
}

/// Fans records out to the sink handles of one run
pub struct Dispatcher {
    run_index: u32,
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<AlignedRecord>,
}

impl Dispatcher {
    pub fn with_handles(
        run_index: u32,
        handles: Vec<SinkHandle>,
        input_rx: mpsc::Receiver<AlignedRecord>,
    ) -> Self {
        Self {
            run_index,
            handles,
            input_rx,
        }
    }

    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Consume records until the input closes, then shut the sinks down
    #[instrument(name = "dispatcher_run", skip(self), fields(run_index = self.run_index))]
    pub async fn run(mut self) -> OutputReport {
        info!(sinks = self.handles.len(), "Dispatcher started");

        let mut records: u64 = 0;
        while let Some(record) = self.input_rx.recv().await {
            records += 1;
            for handle in &self.handles {
                handle.offer(record.clone());
            }
            if records.is_multiple_of(100) {
                debug!(records, "Dispatcher progress");
            }
        }

        let metrics: Vec<_> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect();
        for handle in self.handles {
            handle.shutdown().await;
        }
        let sinks = metrics
            .into_iter()
            .map(|(name, m)| (name, m.snapshot()))
            .collect();

        info!(records, "Dispatcher shutdown complete");
        OutputReport {
            run_index: self.run_index,
            records,
            sinks,
        }
    }

    pub fn spawn(self) -> JoinHandle<OutputReport> {
        tokio::spawn(self.run())
    }
}
