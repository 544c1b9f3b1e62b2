//! Dual-stream nearest-timestamp aligner.
//!
//! Host samples accumulate passively. Each Node arrival re-tries every pending
//! Node sample, oldest first, against the Host buffer; a match within the
//! window emits an [`AlignedRecord`] and consumes the Node sample. Host samples
//! are never consumed and only leave by eviction.

use contracts::{
    AlignedRecord, AlignmentConfig, ChannelMap, CorrectedNodeSample, HostSample, HostTime,
    NodeTime, Position,
};
use tracing::{debug, instrument, trace};

use crate::buffer::StreamBuffer;

/// Aligner settings
#[derive(Debug, Clone, Copy)]
pub struct AlignerConfig {
    /// Match window in seconds
    pub window_s: f64,
    /// Per-stream buffer capacity
    pub capacity: usize,
    /// Unmatched samples older than this are evicted (seconds)
    pub retention_s: f64,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            window_s: 0.4,
            capacity: 100,
            retention_s: 1.0,
        }
    }
}

impl From<&AlignmentConfig> for AlignerConfig {
    fn from(config: &AlignmentConfig) -> Self {
        Self {
            window_s: config.window_ms / 1000.0,
            capacity: config.buffer_capacity,
            retention_s: config.retention_s,
        }
    }
}

/// Pending Node payload (timestamp lives in the buffer index)
#[derive(Debug, Clone)]
struct PendingNode {
    raw_timestamp: NodeTime,
    channels: ChannelMap,
    actuator_active: bool,
}

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlignerStats {
    pub host_samples: u64,
    pub node_samples: u64,
    pub records: u64,
    pub node_evicted: u64,
    pub host_evicted: u64,
    pub node_dropped: u64,
    pub host_dropped: u64,
}

/// Result of one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eviction {
    pub host: usize,
    pub node: usize,
}

/// Per-run aligner
#[derive(Debug)]
pub struct Aligner {
    run_index: u32,
    config: AlignerConfig,
    host: StreamBuffer<Position>,
    node: StreamBuffer<PendingNode>,
    actuation_epoch: Option<HostTime>,
    stats: AlignerStats,
}

impl Aligner {
    pub fn new(run_index: u32, config: AlignerConfig) -> Self {
        Self {
            run_index,
            config,
            host: StreamBuffer::new(config.capacity),
            node: StreamBuffer::new(config.capacity),
            actuation_epoch: None,
            stats: AlignerStats::default(),
        }
    }

    /// Set t=0 for `elapsed_ms`
    pub fn set_actuation_epoch(&mut self, epoch: HostTime) {
        debug!(run_index = self.run_index, epoch = epoch.secs(), "Actuation epoch set");
        self.actuation_epoch = Some(epoch);
    }

    pub fn actuation_epoch(&self) -> Option<HostTime> {
        self.actuation_epoch
    }

    /// Add a Host sample; never triggers matching
    pub fn push_host(&mut self, sample: HostSample) {
        self.stats.host_samples += 1;
        self.host.append(sample.timestamp, sample.position);
        metrics::gauge!("sync_host_buffer_depth", "stream" => "host").set(self.host.len() as f64);
    }

    /// Add a corrected Node sample and emit every record that now matches
    #[instrument(
        level = "trace",
        name = "aligner_push_node",
        skip(self, sample),
        fields(run_index = self.run_index, timestamp = sample.timestamp.secs())
    )]
    pub fn push_node(&mut self, sample: CorrectedNodeSample) -> Vec<AlignedRecord> {
        self.stats.node_samples += 1;
        let epoch = *self.actuation_epoch.get_or_insert(sample.timestamp);

        self.node.append(
            sample.timestamp,
            PendingNode {
                raw_timestamp: sample.raw_timestamp,
                channels: sample.channels,
                actuator_active: sample.actuator_active,
            },
        );

        let window_s = self.config.window_s;
        let host = &self.host;
        let mut matches = Vec::new();
        let matched = self.node.take_where(|node_time, _| {
            match host.nearest(node_time) {
                Some(hit) if hit.delta_s <= window_s => {
                    matches.push((node_time, hit.timestamp, *hit.item, hit.delta_s));
                    true
                }
                _ => false,
            }
        });

        let records: Vec<AlignedRecord> = matched
            .into_iter()
            .zip(matches)
            .map(|((node_time, pending), (_, host_time, position, delta_s))| {
                trace!(
                    raw = pending.raw_timestamp.secs(),
                    node_time = node_time.secs(),
                    host_time = host_time.secs(),
                    "Aligned"
                );
                AlignedRecord {
                    run_index: self.run_index,
                    elapsed_ms: (node_time - epoch) * 1000.0,
                    node_time,
                    host_time,
                    delta_ms: delta_s * 1000.0,
                    position,
                    channels: pending.channels,
                    actuator_active: pending.actuator_active,
                }
            })
            .collect();

        self.stats.records += records.len() as u64;
        for record in &records {
            metrics::histogram!("sync_host_alignment_delta_ms").record(record.delta_ms);
        }
        metrics::counter!("sync_host_records_total").increment(records.len() as u64);
        metrics::gauge!("sync_host_buffer_depth", "stream" => "node").set(self.node.len() as f64);

        records
    }

    /// Age eviction on both buffers
    pub fn evict(&mut self, now: HostTime) -> Eviction {
        let eviction = Eviction {
            host: self.host.evict_older_than(now, self.config.retention_s),
            node: self.node.evict_older_than(now, self.config.retention_s),
        };
        self.stats.host_evicted += eviction.host as u64;
        self.stats.node_evicted += eviction.node as u64;

        if eviction.node > 0 {
            metrics::counter!("sync_host_samples_evicted_total", "stream" => "node")
                .increment(eviction.node as u64);
            debug!(
                run_index = self.run_index,
                evicted = eviction.node,
                "Evicted unmatched node samples"
            );
        }
        if eviction.host > 0 {
            metrics::counter!("sync_host_samples_evicted_total", "stream" => "host")
                .increment(eviction.host as u64);
        }
        eviction
    }

    /// Drop all buffered samples and the epoch
    pub fn reset(&mut self) {
        self.host.clear();
        self.node.clear();
        self.actuation_epoch = None;
    }

    pub fn pending_node(&self) -> usize {
        self.node.len()
    }

    pub fn host_len(&self) -> usize {
        self.host.len()
    }

    pub fn run_index(&self) -> u32 {
        self.run_index
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    pub fn stats(&self) -> AlignerStats {
        AlignerStats {
            node_dropped: self.node.dropped_count(),
            host_dropped: self.host.dropped_count(),
            ..self.stats
        }
    }
}
