//! Mock Node
//!
//! 在没有硬件的情况下扮演 Node：接收配置帧，响应握手，按发送间隔上报温度数据。
//! 时钟可设偏差，故障行为 (畸形回复、不回 reset_ack、断线等) 可配置。

use std::time::Duration;

use contracts::{
    channel_key, ActuationParams, ChannelMap, ChannelReading, DataPacket, HostCommand,
    NodeConfigFrame, NodeMessage, NodeTime,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::TokioWallClock;
use crate::error::{Result, TransportError};
use crate::framing::{LineFramed, LineRead};

/// Mock Node 配置
#[derive(Debug, Clone)]
pub struct SimulatedNodeConfig {
    /// Node 时钟相对 Host 的偏差 (秒)
    pub clock_skew_s: f64,

    /// 收到 `sync` 后多久回复
    pub sync_reply_delay: Duration,

    /// 前 N 次 `sync` 回复畸形帧
    pub malformed_sync_replies: u32,

    /// 是否回复 `sync`
    pub answer_sync: bool,

    /// 是否回复 `reset_ack`
    pub ack_reset: bool,

    /// 读数恒为 null 的通道
    pub fault_channels: Vec<u8>,

    /// 环境温度 (°C)
    pub ambient_c: f64,

    /// 执行器通电时的升温速率 (°C/s)
    pub heating_rate_c_per_s: f64,

    /// 每 N 个数据包插入一帧垃圾数据
    pub garbage_every: Option<u64>,

    /// 发送 N 个数据包后断开连接
    pub disconnect_after_packets: Option<u64>,

    /// 第 N 次运行的采集阶段开始时发送 `stop`
    pub stop_on_run: Option<u32>,

    /// 数据包是否携带 run_index
    pub include_run_index: bool,
}

impl Default for SimulatedNodeConfig {
    fn default() -> Self {
        Self {
            clock_skew_s: 0.0,
            sync_reply_delay: Duration::from_millis(5),
            malformed_sync_replies: 0,
            answer_sync: true,
            ack_reset: true,
            fault_channels: Vec::new(),
            ambient_c: 22.0,
            heating_rate_c_per_s: 1.5,
            garbage_every: None,
            disconnect_after_packets: None,
            stop_on_run: None,
            include_run_index: true,
        }
    }
}

/// Summary of what the mock Node did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeReport {
    pub config: Option<NodeConfigFrame>,
    pub runs_started: u32,
    pub runs_completed: u32,
    pub packets_sent: u64,
    pub syncs_answered: u32,
    pub resets_acked: u32,
    pub disconnected: bool,
}

/// What the Host asked for while a run was in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Reset,
    Stop,
    Disconnected,
}

/// Mock Node over any duplex stream
pub struct SimulatedNode<S> {
    framed: LineFramed<S>,
    config: SimulatedNodeConfig,
    clock: TokioWallClock,
    report: NodeReport,
    sync_replies: u32,
}

impl<S> SimulatedNode<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// `host_clock` is the reference timeline; the Node clock is it plus the skew
    pub fn new(stream: S, config: SimulatedNodeConfig, host_clock: TokioWallClock) -> Self {
        let clock = host_clock.skewed(config.clock_skew_s);
        Self {
            framed: LineFramed::new(stream),
            config,
            clock,
            report: NodeReport::default(),
            sync_replies: 0,
        }
    }

    /// Play the Node side until `stop`, the configured run count, or disconnect
    pub async fn run(mut self) -> Result<NodeReport> {
        let frame = self.read_config().await?;
        info!(
            num_runs = frame.num_runs,
            run_time = frame.run_time,
            "Mock node received configuration"
        );
        self.report.config = Some(frame.clone());

        let mut run_index = 0;
        while run_index < frame.num_runs {
            let Some(command) = self.next_command().await? else {
                return Ok(self.report);
            };
            match command {
                HostCommand::Start => {
                    run_index += 1;
                    self.report.runs_started += 1;
                    match self.run_once(run_index, &frame).await? {
                        Flow::Continue => self.report.runs_completed += 1,
                        Flow::Reset => self.ack_reset().await?,
                        Flow::Stop => return Ok(self.report),
                        Flow::Disconnected => {
                            self.report.disconnected = true;
                            return Ok(self.report);
                        }
                    }
                }
                HostCommand::Reset => self.ack_reset().await?,
                HostCommand::Stop => return Ok(self.report),
                other => debug!(command = %other, "Mock node ignoring command"),
            }
        }

        // 所有运行结束后等待 Host 的 stop
        loop {
            match self.next_command().await {
                Ok(Some(HostCommand::Stop)) | Ok(None) | Err(_) => return Ok(self.report),
                Ok(Some(HostCommand::Reset)) => self.ack_reset().await?,
                Ok(Some(_)) => {}
            }
        }
    }

    async fn read_config(&mut self) -> Result<NodeConfigFrame> {
        loop {
            if let LineRead::Line(line) = self.framed.next_line().await? {
                return NodeConfigFrame::decode(&line).map_err(|e| TransportError::Protocol {
                    what: "config frame",
                    message: e.to_string(),
                });
            }
        }
    }

    /// Next parseable command; `None` when the Host closed the connection
    async fn next_command(&mut self) -> Result<Option<HostCommand>> {
        loop {
            match self.framed.next_line().await {
                Ok(LineRead::Line(line)) => match HostCommand::parse(&line) {
                    Ok(command) => return Ok(Some(command)),
                    Err(_) => warn!(frame = %line, "Mock node received unknown command"),
                },
                Ok(_) => {}
                Err(e) if e.is_connection_lost() => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&mut self, message: &NodeMessage) -> Result<()> {
        self.framed.send_line(&message.encode()?).await
    }

    async fn ack_reset(&mut self) -> Result<()> {
        if self.config.ack_reset {
            self.send(&NodeMessage::ResetAck).await?;
            self.report.resets_acked += 1;
        }
        Ok(())
    }

    fn node_now(&self) -> NodeTime {
        NodeTime(self.clock.now_secs())
    }

    async fn run_once(&mut self, run_index: u32, frame: &NodeConfigFrame) -> Result<Flow> {
        self.send(&NodeMessage::Ready).await?;

        match self.answer_sync().await? {
            Flow::Continue => {}
            other => return Ok(other),
        }

        tokio::time::sleep(Duration::from_secs_f64(frame.lead_time)).await;

        loop {
            match self.next_command().await? {
                Some(HostCommand::Trigger) => break,
                Some(HostCommand::Stop) => return Ok(Flow::Stop),
                Some(HostCommand::Reset) => return Ok(Flow::Reset),
                Some(_) => {}
                None => return Ok(Flow::Disconnected),
            }
        }

        if self.config.stop_on_run == Some(run_index) {
            self.send(&NodeMessage::Stop).await?;
            return Ok(Flow::Stop);
        }

        self.collect(run_index, frame).await
    }

    async fn answer_sync(&mut self) -> Result<Flow> {
        loop {
            match self.next_command().await? {
                Some(HostCommand::Sync) => {
                    if self.sync_replies < self.config.malformed_sync_replies {
                        self.sync_replies += 1;
                        self.framed.send_line("sync_ts:not-a-number").await?;
                        continue;
                    }
                    if !self.config.answer_sync {
                        continue;
                    }
                    tokio::time::sleep(self.config.sync_reply_delay).await;
                    let now = self.node_now();
                    self.send(&NodeMessage::SyncTs(now)).await?;
                    self.report.syncs_answered += 1;
                    return Ok(Flow::Continue);
                }
                Some(HostCommand::Stop) => return Ok(Flow::Stop),
                Some(HostCommand::Reset) => return Ok(Flow::Reset),
                Some(_) => {}
                None => return Ok(Flow::Disconnected),
            }
        }
    }

    async fn collect(&mut self, run_index: u32, frame: &NodeConfigFrame) -> Result<Flow> {
        let started = Instant::now();
        let run_time = Duration::from_secs_f64(frame.run_time);
        let lead = Duration::from_secs_f64(frame.lead_time);
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(frame.send_interval));

        let mut heater = Heater::new(frame.actuation, self.config.ambient_c);
        let mut pulse_sent = false;

        loop {
            tokio::select! {
                line = self.framed.next_line() => {
                    match line {
                        Ok(LineRead::Line(line)) => match HostCommand::parse(&line) {
                            Ok(HostCommand::Stop) => return Ok(Flow::Stop),
                            Ok(HostCommand::Reset) => return Ok(Flow::Reset),
                            _ => debug!(frame = %line, "Mock node ignoring frame during collection"),
                        },
                        Ok(_) => {}
                        Err(e) if e.is_connection_lost() => return Ok(Flow::Disconnected),
                        Err(e) => return Err(e),
                    }
                }
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if elapsed > run_time {
                        return Ok(Flow::Continue);
                    }

                    if !pulse_sent && elapsed >= lead {
                        pulse_sent = true;
                        heater.start(elapsed.as_secs_f64());
                        let now = self.node_now();
                        self.send(&NodeMessage::PulseStart(now)).await?;
                    }
                    heater.step(elapsed.as_secs_f64(), frame.send_interval, self.config.heating_rate_c_per_s);

                    if let Some(every) = self.config.garbage_every {
                        if self.report.packets_sent > 0 && self.report.packets_sent % every == 0 {
                            self.framed.send_line("{garbage").await?;
                        }
                    }

                    let packet = self.packet(run_index, frame, &heater);
                    self.send(&NodeMessage::Data(packet)).await?;
                    self.report.packets_sent += 1;

                    if self.config.disconnect_after_packets == Some(self.report.packets_sent) {
                        warn!(packets = self.report.packets_sent, "Mock node dropping connection");
                        self.framed.shutdown().await?;
                        return Ok(Flow::Disconnected);
                    }
                }
            }
        }
    }

    fn packet(&self, run_index: u32, frame: &NodeConfigFrame, heater: &Heater) -> DataPacket {
        let temperatures: ChannelMap = frame
            .channels
            .iter()
            .map(|&ch| {
                let reading = if self.config.fault_channels.contains(&ch) {
                    ChannelReading::Fault
                } else {
                    // 通道之间给一点固定差异
                    ChannelReading::Celsius(round2(heater.temp_c + f64::from(ch) * 0.1))
                };
                (channel_key(ch), reading)
            })
            .collect();

        DataPacket {
            timestamp: self.node_now().secs(),
            temperatures,
            sma_active: heater.active,
            run_index: self.config.include_run_index.then_some(run_index),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// First-order heating model for the actuator
#[derive(Debug, Clone)]
struct Heater {
    actuation: ActuationParams,
    ambient_c: f64,
    temp_c: f64,
    active: bool,
    started_at: Option<f64>,
}

impl Heater {
    fn new(actuation: ActuationParams, ambient_c: f64) -> Self {
        Self {
            actuation,
            ambient_c,
            temp_c: ambient_c,
            active: false,
            started_at: None,
        }
    }

    fn start(&mut self, at_s: f64) {
        self.active = true;
        self.started_at = Some(at_s);
    }

    fn step(&mut self, now_s: f64, dt_s: f64, rate: f64) {
        if self.active {
            self.temp_c += rate * dt_s;
            let on_for = self.started_at.map_or(0.0, |t| now_s - t);
            let done = match self.actuation {
                ActuationParams::Pulse { pulse_duration } => on_for >= pulse_duration,
                ActuationParams::TargetTemperature {
                    target_temp_c,
                    max_heat_time,
                } => self.temp_c >= target_temp_c || on_for >= max_heat_time,
            };
            if done {
                self.active = false;
            }
        } else {
            self.temp_c -= (self.temp_c - self.ambient_c) * 0.05;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{NodeChannel, NodeLink, ReadOutcome};
    use contracts::WIRE_PROTOCOL_VERSION;

    fn config_frame(num_runs: u32) -> NodeConfigFrame {
        NodeConfigFrame {
            protocol_version: WIRE_PROTOCOL_VERSION,
            send_interval: 0.25,
            channels: vec![0, 1],
            tc_type: "J".into(),
            num_runs,
            run_time: 2.0,
            lead_time: 0.5,
            actuation: ActuationParams::Pulse {
                pulse_duration: 0.5,
            },
        }
    }

    async fn expect(link: &mut NodeLink<tokio::io::DuplexStream>) -> NodeMessage {
        loop {
            match link.recv(Duration::from_secs(30)).await.unwrap() {
                ReadOutcome::Message(m) => return m,
                ReadOutcome::Idle => continue,
                ReadOutcome::Malformed { frame, .. } => panic!("unexpected malformed {frame}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_protocol() {
        let (host_side, node_side) = tokio::io::duplex(64 * 1024);
        let clock = TokioWallClock::anchored_at(1_000.0);
        let node = SimulatedNode::new(
            node_side,
            SimulatedNodeConfig {
                clock_skew_s: 0.5,
                fault_channels: vec![1],
                ..Default::default()
            },
            clock,
        );
        let handle = tokio::spawn(node.run());

        let mut link = NodeLink::new(host_side, "mock");
        link.send_config(&config_frame(1)).await.unwrap();
        link.send(HostCommand::Start).await.unwrap();
        assert_eq!(expect(&mut link).await, NodeMessage::Ready);

        link.send(HostCommand::Sync).await.unwrap();
        let NodeMessage::SyncTs(t_node) = expect(&mut link).await else {
            panic!("expected sync reply");
        };
        assert!((t_node.secs() - clock.now_secs() - 0.5).abs() < 0.1);

        link.send(HostCommand::Trigger).await.unwrap();
        let mut packets = 0;
        let mut saw_pulse = false;
        while packets < 5 {
            match expect(&mut link).await {
                NodeMessage::Data(packet) => {
                    assert_eq!(packet.run_index, Some(1));
                    assert_eq!(packet.temperatures["ch1"], ChannelReading::Fault);
                    packets += 1;
                }
                NodeMessage::PulseStart(_) => saw_pulse = true,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_pulse);

        link.send(HostCommand::Stop).await.unwrap();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.runs_started, 1);
        assert_eq!(report.syncs_answered, 1);
        assert!(report.packets_sent >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_acknowledged() {
        let (host_side, node_side) = tokio::io::duplex(4096);
        let node = SimulatedNode::new(
            node_side,
            SimulatedNodeConfig::default(),
            TokioWallClock::anchored_at(0.0),
        );
        let handle = tokio::spawn(node.run());

        let mut link = NodeLink::new(host_side, "mock");
        link.send_config(&config_frame(2)).await.unwrap();
        link.send(HostCommand::Reset).await.unwrap();
        assert_eq!(expect(&mut link).await, NodeMessage::ResetAck);

        link.send(HostCommand::Stop).await.unwrap();
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.resets_acked, 1);
        assert_eq!(report.runs_started, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_sync_then_valid() {
        let (host_side, node_side) = tokio::io::duplex(4096);
        let node = SimulatedNode::new(
            node_side,
            SimulatedNodeConfig {
                malformed_sync_replies: 1,
                ..Default::default()
            },
            TokioWallClock::anchored_at(0.0),
        );
        let handle = tokio::spawn(node.run());

        let mut link = NodeLink::new(host_side, "mock");
        link.send_config(&config_frame(1)).await.unwrap();
        link.send(HostCommand::Start).await.unwrap();
        assert_eq!(expect(&mut link).await, NodeMessage::Ready);

        link.send(HostCommand::Sync).await.unwrap();
        let outcome = loop {
            match link.recv(Duration::from_secs(1)).await.unwrap() {
                ReadOutcome::Idle => continue,
                other => break other,
            }
        };
        assert!(matches!(outcome, ReadOutcome::Malformed { .. }));

        link.send(HostCommand::Sync).await.unwrap();
        assert!(matches!(expect(&mut link).await, NodeMessage::SyncTs(_)));

        drop(link);
        let report = handle.await.unwrap().unwrap();
        assert!(report.disconnected || report.runs_completed == 0);
    }

    #[test]
    fn test_heater_pulse_turns_off() {
        let mut heater = Heater::new(
            ActuationParams::Pulse {
                pulse_duration: 1.0,
            },
            20.0,
        );
        heater.start(0.0);
        heater.step(0.5, 0.5, 2.0);
        assert!(heater.active);
        assert!((heater.temp_c - 21.0).abs() < 1e-9);
        heater.step(1.0, 0.5, 2.0);
        assert!(!heater.active);
    }

    #[test]
    fn test_heater_target_temperature() {
        let mut heater = Heater::new(
            ActuationParams::TargetTemperature {
                target_temp_c: 25.0,
                max_heat_time: 60.0,
            },
            20.0,
        );
        heater.start(0.0);
        for i in 1..=10 {
            heater.step(i as f64, 1.0, 1.0);
        }
        assert!(!heater.active);
        assert!(heater.temp_c < 26.0);
    }
}
