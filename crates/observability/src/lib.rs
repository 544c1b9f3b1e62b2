//! # Observability
//!
//! 日志与指标：
//!
//! - `tracing` subscriber (JSON / Pretty / Compact)，`RUST_LOG` 优先于配置的缺省级别
//! - 可选的 Prometheus 导出端点
//! - 对齐记录、握手迁移、运行结果的指标与会话统计 ([`metrics`])
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig {
//!     log_format: LogFormat::Compact,
//!     metrics_port: Some(9000),
//!     ..Default::default()
//! })?;
//! ```

pub mod metrics;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    record_aligned, record_reset, record_run_outcome, record_transition,
    AlignmentMetricsAggregator, MetricsSummary, RunningStats, StatsSummary,
};

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 端口，None 表示不导出
    pub metrics_port: Option<u16>,
    /// `RUST_LOG` 未设置时使用
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: None,
            default_log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// 结构化日志，便于和 CSV 一起归档
    #[default]
    Json,
    Pretty,
    /// 单行，适合实验台终端
    Compact,
}

impl LogFormat {
    fn layer<S>(self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        match self {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
            LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
        }
    }
}

/// Install the global subscriber and, if configured, the metrics endpoint
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(config.log_format.layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        serve_metrics(port)?;
    }

    tracing::debug!(log_format = ?config.log_format, metrics_port = ?config.metrics_port, "Logging ready");
    Ok(())
}

/// Expose `/metrics` on `0.0.0.0:<port>`
///
/// Separate from [`init_with_config`] so the port can be chosen after the
/// configuration file has been read.
pub fn serve_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics endpoint on {addr}"))?;

    tracing::info!(%addr, "Prometheus metrics endpoint listening");
    Ok(())
}
