//! Per-sink delivery counters
//!
//! 计数同时镜像到 `metrics` facade (标签 `sink`)。`last_elapsed_ms` 记录已写入的
//! 最新记录在本次运行中的位置，用于判断慢 sink 落后了多少。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// What happened to a record handed to a sink queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full
    Dropped,
    /// Worker already gone
    Closed,
}

#[derive(Debug)]
pub struct SinkMetrics {
    sink: String,
    queued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    // f64 bits, NaN until the first write
    last_elapsed_ms: AtomicU64,
}

impl SinkMetrics {
    pub fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            queued: AtomicU64::new(0),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_elapsed_ms: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    /// Count one hand-off attempt
    pub fn record_delivery(&self, delivery: Delivery, backlog: usize) {
        match delivery {
            Delivery::Queued => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                self.set_backlog(backlog);
            }
            Delivery::Dropped | Delivery::Closed => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sync_host_sink_dropped_total", "sink" => self.sink.clone())
                    .increment(1);
            }
        }
    }

    pub fn set_backlog(&self, backlog: usize) {
        metrics::gauge!("sync_host_sink_queue_len", "sink" => self.sink.clone())
            .set(backlog as f64);
    }

    pub fn record_written(&self, elapsed_ms: f64) {
        self.written.fetch_add(1, Ordering::Relaxed);
        self.last_elapsed_ms
            .store(elapsed_ms.to_bits(), Ordering::Relaxed);
        metrics::counter!("sync_host_sink_writes_total", "sink" => self.sink.clone()).increment(1);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sync_host_sink_failures_total", "sink" => self.sink.clone())
            .increment(1);
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last = f64::from_bits(self.last_elapsed_ms.load(Ordering::Relaxed));
        MetricsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            written: self.written(),
            failed: self.failed(),
            dropped: self.dropped(),
            last_elapsed_ms: (!last.is_nan()).then_some(last),
        }
    }
}

/// Point-in-time copy of [`SinkMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queued: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
    pub last_elapsed_ms: Option<f64>,
}

impl MetricsSnapshot {
    /// Every queued record reached the sink
    pub fn is_complete(&self) -> bool {
        self.dropped == 0 && self.failed == 0 && self.written == self.queued
    }
}
