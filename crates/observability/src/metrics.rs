//! 对齐与会话指标收集模块
//!
//! 基于 AlignedRecord 与每次运行的结果收集和统计运行指标。

use std::collections::BTreeMap;

use contracts::{AlignedRecord, RunState};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

/// 记录一条对齐记录的指标
pub fn record_aligned(record: &AlignedRecord) {
    counter!("sync_host_aligned_rows_total").increment(1);
    gauge!("sync_host_current_run").set(f64::from(record.run_index));
    histogram!("sync_host_row_delta_ms").record(record.delta_ms);

    if !record.position.is_detected() {
        counter!("sync_host_rows_without_position_total").increment(1);
    }
    let faults = record
        .channels
        .values()
        .filter(|r| r.value().is_none())
        .count();
    if faults > 0 {
        counter!("sync_host_channel_faults_total").increment(faults as u64);
    }
}

/// 记录握手状态迁移
pub fn record_transition(from: RunState, to: RunState) {
    counter!(
        "sync_host_state_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// 记录一次运行的结束
pub fn record_run_outcome(outcome: &str) {
    counter!("sync_host_runs_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录 reset 握手结果
pub fn record_reset(acknowledged: bool) {
    let status = if acknowledged { "acked" } else { "missing" };
    counter!("sync_host_resets_total", "status" => status).increment(1);
}

/// 会话指标聚合器
///
/// 在内存中聚合指标，便于会话结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct AlignmentMetricsAggregator {
    /// 对齐记录总数
    pub total_records: u64,

    /// 无位置检测的记录数
    pub records_without_position: u64,

    /// 故障通道读数总数
    pub channel_faults: u64,

    /// 执行器通电期间的记录数
    pub actuator_active_records: u64,

    /// 对齐误差统计 (ms)
    pub delta_stats: RunningStats,

    /// 时钟偏移统计 (ms)，每次运行一个值
    pub offset_stats: RunningStats,

    /// 往返时延统计 (ms)
    pub rtt_stats: RunningStats,

    /// 各结果的运行次数 (finished / 中止原因)
    pub run_outcomes: BTreeMap<String, u64>,
}

impl AlignmentMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新记录统计
    pub fn update(&mut self, record: &AlignedRecord) {
        self.total_records += 1;
        if !record.position.is_detected() {
            self.records_without_position += 1;
        }
        self.channel_faults += record
            .channels
            .values()
            .filter(|r| r.value().is_none())
            .count() as u64;
        if record.actuator_active {
            self.actuator_active_records += 1;
        }
        self.delta_stats.push(record.delta_ms);
    }

    /// 记录一次运行的时钟同步结果与结局
    pub fn record_run(&mut self, offset_ms: Option<f64>, rtt_ms: Option<f64>, outcome: &str) {
        if let Some(offset) = offset_ms {
            self.offset_stats.push(offset);
        }
        if let Some(rtt) = rtt_ms {
            self.rtt_stats.push(rtt);
        }
        *self.run_outcomes.entry(outcome.to_string()).or_insert(0) += 1;
    }

    /// 合并另一个聚合器 (例如单次运行的统计)
    pub fn merge(&mut self, other: &AlignmentMetricsAggregator) {
        self.total_records += other.total_records;
        self.records_without_position += other.records_without_position;
        self.channel_faults += other.channel_faults;
        self.actuator_active_records += other.actuator_active_records;
        self.delta_stats.merge(&other.delta_stats);
        self.offset_stats.merge(&other.offset_stats);
        self.rtt_stats.merge(&other.rtt_stats);
        for (outcome, count) in &other.run_outcomes {
            *self.run_outcomes.entry(outcome.clone()).or_insert(0) += count;
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let runs: u64 = self.run_outcomes.values().sum();
        let finished = self.run_outcomes.get("finished").copied().unwrap_or(0);
        MetricsSummary {
            runs,
            runs_finished: finished,
            total_records: self.total_records,
            records_without_position: self.records_without_position,
            channel_faults: self.channel_faults,
            actuator_active_records: self.actuator_active_records,
            missing_position_rate: if self.total_records > 0 {
                self.records_without_position as f64 / self.total_records as f64 * 100.0
            } else {
                0.0
            },
            delta_ms: StatsSummary::from(&self.delta_stats),
            offset_ms: StatsSummary::from(&self.offset_stats),
            rtt_ms: StatsSummary::from(&self.rtt_stats),
            run_outcomes: self.run_outcomes.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub runs: u64,
    pub runs_finished: u64,
    pub total_records: u64,
    pub records_without_position: u64,
    pub channel_faults: u64,
    pub actuator_active_records: u64,
    pub missing_position_rate: f64,
    pub delta_ms: StatsSummary,
    pub offset_ms: StatsSummary,
    pub rtt_ms: StatsSummary,
    pub run_outcomes: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Session Summary ===")?;
        writeln!(f, "Runs: {} ({} finished)", self.runs, self.runs_finished)?;
        writeln!(f, "Aligned records: {}", self.total_records)?;
        writeln!(
            f,
            "Records without position: {} ({:.2}%)",
            self.records_without_position, self.missing_position_rate
        )?;
        writeln!(f, "Channel faults: {}", self.channel_faults)?;
        writeln!(f, "Records with actuator on: {}", self.actuator_active_records)?;
        writeln!(f, "Alignment delta (ms): {}", self.delta_ms)?;
        writeln!(f, "Clock offset (ms): {}", self.offset_ms)?;
        writeln!(f, "Sync RTT (ms): {}", self.rtt_ms)?;

        if !self.run_outcomes.is_empty() {
            writeln!(f, "Run outcomes:")?;
            for (outcome, count) in &self.run_outcomes {
                writeln!(f, "  {}: {}", outcome, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 合并另一组统计 (Chan 并行公式)
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64) / count as f64;

        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count = count;
        self.mean = mean;
        self.m2 = m2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ChannelMap, ChannelReading, HostTime, Position};

    fn record(delta_ms: f64, position: Position) -> AlignedRecord {
        let mut channels = ChannelMap::new();
        channels.insert("ch0".into(), ChannelReading::Celsius(30.0));
        channels.insert("ch1".into(), ChannelReading::Fault);
        AlignedRecord {
            run_index: 1,
            elapsed_ms: 0.0,
            node_time: HostTime(10.0),
            host_time: HostTime(10.0),
            delta_ms,
            position,
            channels,
            actuator_active: true,
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let mut all = RunningStats::default();
        let mut left = RunningStats::default();
        let mut right = RunningStats::default();
        for (i, v) in [3.0, 7.5, 1.0, 9.0, 4.0, 2.5].into_iter().enumerate() {
            all.push(v);
            if i < 2 {
                left.push(v);
            } else {
                right.push(v);
            }
        }
        left.merge(&right);
        assert_eq!(left.count(), all.count());
        assert!((left.mean() - all.mean()).abs() < 1e-10);
        assert!((left.variance() - all.variance()).abs() < 1e-10);
        assert_eq!(left.min(), 1.0);
        assert_eq!(left.max(), 9.0);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = AlignmentMetricsAggregator::new();
        aggregator.update(&record(120.0, Position::planar(1.0, 1.0)));
        aggregator.update(&record(80.0, Position::missing()));
        aggregator.record_run(Some(42.0), Some(3.0), "finished");
        aggregator.record_run(None, None, "sync_timeout");

        let summary = aggregator.summary();
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.records_without_position, 1);
        assert_eq!(summary.channel_faults, 2);
        assert_eq!(summary.actuator_active_records, 2);
        assert!((summary.delta_ms.mean - 100.0).abs() < 1e-10);
        assert_eq!(summary.offset_ms.count, 1);
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.runs_finished, 1);
    }

    #[test]
    fn test_merge_runs() {
        let mut first = AlignmentMetricsAggregator::new();
        first.update(&record(100.0, Position::planar(0.0, 0.0)));
        let mut second = AlignmentMetricsAggregator::new();
        second.update(&record(300.0, Position::missing()));
        second.record_run(Some(5.0), None, "finished");

        let mut session = AlignmentMetricsAggregator::new();
        session.merge(&first);
        session.merge(&second);
        assert_eq!(session.total_records, 2);
        assert_eq!(session.records_without_position, 1);
        assert!((session.delta_stats.mean() - 200.0).abs() < 1e-10);
        assert_eq!(session.run_outcomes.get("finished"), Some(&1));
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = AlignmentMetricsAggregator::new();
        aggregator.update(&record(50.0, Position::missing()));
        aggregator.record_run(Some(10.0), Some(2.0), "finished");

        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Aligned records: 1"));
        assert!(output.contains("100.00%"));
        assert!(output.contains("finished: 1"));
    }
}
