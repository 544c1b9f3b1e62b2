//! SinkHandle - one sink behind its own bounded queue and worker task

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{AlignedRecord, RecordSink};

use crate::metrics::{Delivery, SinkMetrics};

pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<AlignedRecord>,
    metrics: Arc<SinkMetrics>,
    worker: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker for `sink`
    pub fn spawn<S: RecordSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new(&name));
        let worker = tokio::spawn(sink_worker(sink, rx, Arc::clone(&metrics)));

        Self {
            name,
            tx,
            metrics,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue a record without waiting; a full queue drops it
    pub fn offer(&self, record: AlignedRecord) -> Delivery {
        let delivery = match self.tx.try_send(record) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(r)) => {
                warn!(
                    sink = %self.name,
                    run_index = r.run_index,
                    elapsed_ms = r.elapsed_ms,
                    "Sink queue full, record dropped"
                );
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(r)) => {
                error!(sink = %self.name, run_index = r.run_index, "Sink worker is gone");
                Delivery::Closed
            }
        };
        let backlog = self.tx.max_capacity() - self.tx.capacity();
        self.metrics.record_delivery(delivery, backlog);
        delivery
    }

    /// Let the worker drain its queue, then flush and close the sink
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(sink = %self.name, error = ?e, "Sink worker panicked");
        }
        debug!(sink = %self.name, written = self.metrics.written(), "Sink closed");
    }
}

#[instrument(name = "sink_worker_loop", skip_all, fields(sink = %metrics.sink()))]
async fn sink_worker<S: RecordSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<AlignedRecord>,
    metrics: Arc<SinkMetrics>,
) {
    while let Some(record) = rx.recv().await {
        metrics.set_backlog(rx.len());
        match sink.write(&record).await {
            Ok(()) => metrics.record_written(record.elapsed_ms),
            Err(e) => {
                // 单条失败不终止 worker
                metrics.record_failed();
                error!(run_index = record.run_index, error = %e, "Sink write failed");
            }
        }
    }

    if let Err(e) = sink.flush().await {
        error!(error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(error = %e, "Close failed on shutdown");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use contracts::{ChannelMap, ContractError, HostTime, Position};
    use tokio::time::{sleep, Duration};

    pub(crate) fn record(run_index: u32, elapsed_ms: f64) -> AlignedRecord {
        AlignedRecord {
            run_index,
            elapsed_ms,
            node_time: HostTime(100.0 + elapsed_ms / 1000.0),
            host_time: HostTime(100.0 + elapsed_ms / 1000.0),
            delta_ms: 0.0,
            position: Position::planar(1.0, 2.0),
            channels: ChannelMap::new(),
            actuator_active: false,
        }
    }

    /// Sink that sleeps per write and can be told to fail
    struct BenchSink {
        write_delay: Duration,
        fail: bool,
    }

    impl RecordSink for BenchSink {
        fn name(&self) -> &str {
            "bench"
        }

        async fn write(&mut self, _record: &AlignedRecord) -> Result<(), ContractError> {
            sleep(self.write_delay).await;
            if self.fail {
                return Err(ContractError::sink_write("bench", "disk full"));
            }
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_records_reach_sink_in_order() {
        let handle = SinkHandle::spawn(
            BenchSink {
                write_delay: Duration::ZERO,
                fail: false,
            },
            10,
        );
        for i in 0..5 {
            assert_eq!(handle.offer(record(1, i as f64 * 250.0)), Delivery::Queued);
        }

        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.written, 5);
        assert_eq!(snapshot.last_elapsed_ms, Some(1000.0));
        assert!(snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_slow_sink_drops_when_full() {
        let handle = SinkHandle::spawn(
            BenchSink {
                write_delay: Duration::from_millis(100),
                fail: false,
            },
            2,
        );
        let outcomes: Vec<_> = (0..10).map(|i| handle.offer(record(1, i as f64))).collect();

        assert!(outcomes.contains(&Delivery::Dropped));
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.written + snapshot.dropped, 10);
    }

    #[tokio::test]
    async fn test_write_failures_do_not_stop_worker() {
        let handle = SinkHandle::spawn(
            BenchSink {
                write_delay: Duration::ZERO,
                fail: true,
            },
            10,
        );
        for i in 0..3 {
            handle.offer(record(1, i as f64));
        }

        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;
        assert_eq!(metrics.failed(), 3);
        assert_eq!(metrics.written(), 0);
    }
}
