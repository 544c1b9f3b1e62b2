//! ExperimentBlueprint - Config Loader 输出
//!
//! 描述一次完整实验：监听地址、Node 采集参数、运行次数、握手超时、对齐窗口、
//! 成像采样与输出路由。所有字段都有缺省值，空配置文件即可运行。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use validator::Validate;

use crate::{ActuationParams, NodeConfigFrame, WIRE_PROTOCOL_VERSION};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的实验配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExperimentBlueprint {
    /// 配置版本
    pub version: ConfigVersion,

    /// 实验标识与表征参数
    #[validate(nested)]
    pub experiment: ExperimentConfig,

    /// Host 监听设置
    #[validate(nested)]
    pub host: HostConfig,

    /// 下发给 Node 的采集参数
    #[validate(nested)]
    pub node: NodeConfig,

    /// 多次运行编排
    #[validate(nested)]
    pub runs: RunConfig,

    /// 握手与时钟同步
    #[validate(nested)]
    pub handshake: HandshakeConfig,

    /// 双流对齐
    #[validate(nested)]
    pub alignment: AlignmentConfig,

    /// 成像采样
    #[validate(nested)]
    pub imaging: ImagingConfig,

    /// 输出路由配置
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

impl Default for ExperimentBlueprint {
    fn default() -> Self {
        Self {
            version: ConfigVersion::V1,
            experiment: ExperimentConfig::default(),
            host: HostConfig::default(),
            node: NodeConfig::default(),
            runs: RunConfig::default(),
            handshake: HandshakeConfig::default(),
            alignment: AlignmentConfig::default(),
            imaging: ImagingConfig::default(),
            sinks: vec![SinkConfig {
                name: "csv".into(),
                sink_type: SinkType::Csv,
                queue_capacity: default_queue_capacity(),
                params: HashMap::new(),
            }],
        }
    }
}

/// 实验标识：输出目录、表征参数 (电压/电流/负载)、人工停止文件
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExperimentConfig {
    /// 文件名前缀 (无表征参数时使用)
    #[validate(length(min = 1))]
    pub label: String,

    /// 输出目录
    pub output_dir: PathBuf,

    /// 驱动电压 (V)
    pub volts: Option<f64>,

    /// 驱动电流 (A)
    pub current: Option<f64>,

    /// 负载 (g)
    pub load_g: Option<f64>,

    /// 存在即请求停止
    pub stop_file: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            label: "experiment".into(),
            output_dir: PathBuf::from("data"),
            volts: None,
            current: None,
            load_g: None,
            stop_file: PathBuf::from("stop.txt"),
        }
    }
}

impl ExperimentConfig {
    /// Output file stem, e.g. `6p0V_1p5A_100G` or the label
    pub fn file_prefix(&self) -> String {
        match (self.volts, self.current, self.load_g) {
            (Some(v), Some(a), Some(g)) => format!(
                "{}V_{}A_{}G",
                format!("{v:?}").replace('.', "p"),
                format!("{a:?}").replace('.', "p"),
                g.round() as i64
            ),
            _ => self.label.clone(),
        }
    }

    /// Output file name for a 1-based run index
    pub fn run_file_name(&self, run_index: u32) -> String {
        format!("{}_run_{run_index}.csv", self.file_prefix())
    }
}

/// Host 监听设置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HostConfig {
    /// 监听地址 (Node 主动连接)
    #[validate(length(min = 1))]
    pub listen_addr: String,

    /// 单次读取超时 (ms)
    #[validate(range(min = 1))]
    pub read_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5005".into(),
            read_timeout_ms: 100,
        }
    }
}

/// Node 采集参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NodeConfig {
    /// 温度采样/发送间隔 (秒)
    #[validate(range(exclusive_min = 0.0))]
    pub send_interval_s: f64,

    /// 热电偶通道 (0-3)
    #[validate(length(min = 1, max = 4))]
    pub channels: Vec<u8>,

    /// 热电偶类型 (J, K, ...)
    #[validate(length(min = 1, max = 1))]
    pub tc_type: String,

    /// 执行器参数
    pub actuation: ActuationParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            send_interval_s: 0.25,
            channels: vec![0],
            tc_type: "J".into(),
            actuation: ActuationParams::TargetTemperature {
                target_temp_c: 70.0,
                max_heat_time: 90.0,
            },
        }
    }
}

/// 多次运行编排
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RunConfig {
    /// 运行次数
    #[validate(range(min = 1))]
    pub num_runs: u32,

    /// 单次采集时长 (秒，trigger 之后)
    #[validate(range(exclusive_min = 0.0))]
    pub run_time_s: f64,

    /// trigger 之前的预热时长 (秒)
    #[validate(range(min = 0.0))]
    pub lead_time_s: f64,

    /// 两次运行之间的等待 (秒，reset 之后)
    #[validate(range(min = 0.0))]
    pub inter_run_delay_s: f64,

    /// 连续畸形帧上限，达到即中止本次运行
    #[validate(range(min = 1))]
    pub max_consecutive_errors: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_runs: 10,
            run_time_s: 100.0,
            lead_time_s: 2.0,
            inter_run_delay_s: 2.0,
            max_consecutive_errors: 10,
        }
    }
}

/// 握手与时钟同步
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HandshakeConfig {
    /// 等待 `ready` 的单次超时 (秒)，超时后继续等待
    #[validate(range(exclusive_min = 0.0))]
    pub ready_timeout_s: f64,

    /// 等待 `sync_ts` 的总时限 (秒)
    #[validate(range(exclusive_min = 0.0))]
    pub sync_timeout_s: f64,

    /// `sync` 最多发送次数
    #[validate(range(min = 1))]
    pub max_sync_attempts: u32,

    /// |offset| 超过该值时告警 (ms)
    #[validate(range(min = 0.0))]
    pub offset_warn_ms: f64,

    /// 等待 `reset_ack` 的时限 (秒)
    #[validate(range(min = 0.0))]
    pub reset_ack_timeout_s: f64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            ready_timeout_s: 10.0,
            sync_timeout_s: 10.0,
            max_sync_attempts: 3,
            offset_warn_ms: 100.0,
            reset_ack_timeout_s: 5.0,
        }
    }
}

/// 双流对齐参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AlignmentConfig {
    /// 匹配窗口 (ms)
    #[validate(range(exclusive_min = 0.0))]
    pub window_ms: f64,

    /// 每条流的缓冲容量
    #[validate(range(min = 1))]
    pub buffer_capacity: usize,

    /// 未匹配样本保留时长 (秒)
    #[validate(range(exclusive_min = 0.0))]
    pub retention_s: f64,

    /// 淘汰周期 (秒)
    #[validate(range(exclusive_min = 0.0))]
    pub cleanup_interval_s: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            window_ms: 400.0,
            buffer_capacity: 100,
            retention_s: 1.0,
            cleanup_interval_s: 0.5,
        }
    }
}

/// 成像采样
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ImagingConfig {
    /// 位置来源
    pub source: ImagingSourceType,

    /// 采样间隔 (秒)
    #[validate(range(exclusive_min = 0.0))]
    pub sample_interval_s: f64,

    /// replay 源的 JSONL 文件
    pub replay_path: Option<PathBuf>,

    /// mock 源丢失检测的比例 (0-1)
    #[validate(range(min = 0.0, max = 1.0))]
    pub dropout_rate: f64,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            source: ImagingSourceType::Mock,
            sample_interval_s: 0.25,
            replay_path: None,
            dropout_rate: 0.0,
        }
    }
}

/// 位置来源类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagingSourceType {
    /// 合成轨迹
    #[default]
    Mock,
    /// 回放录制的 JSONL
    Replay,
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink 名称
    #[validate(length(min = 1))]
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// 每次运行一个 CSV 文件
    Csv,
}

impl ExperimentBlueprint {
    /// Configuration frame sent to the Node right after accept
    pub fn node_config_frame(&self) -> NodeConfigFrame {
        NodeConfigFrame {
            protocol_version: WIRE_PROTOCOL_VERSION,
            send_interval: self.node.send_interval_s,
            channels: self.node.channels.clone(),
            tc_type: self.node.tc_type.clone(),
            num_runs: self.runs.num_runs,
            run_time: self.runs.run_time_s,
            lead_time: self.runs.lead_time_s,
            actuation: self.node.actuation,
        }
    }
}
