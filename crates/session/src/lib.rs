//! # Session
//!
//! Host 侧实验会话：握手状态机、单次运行的轮询循环、多次运行的编排。
//!
//! 负责：
//! - `HandshakeStateMachine`：`Idle → … → Finished | Aborted`，带迁移历史
//! - `RunSession`：时钟同步、lead-in、采集阶段的单任务轮询循环
//! - `RunOrchestrator`：配置帧、N 次运行、reset 握手、运行间隔、收尾
//! - `Cadence` / `Deadline` / `StopSignal`：基于 `HostClock` 的调度与协作式停止
//!
//! ## 使用示例
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use contracts::ExperimentBlueprint;
//! use dispatcher::OutputFactory;
//! use session::{RunOrchestrator, SessionSettings, StopSignal};
//! use transport::{NodeLink, TokioWallClock};
//!
//! let blueprint = ExperimentBlueprint::default();
//! let listener = tokio::net::TcpListener::bind(&blueprint.host.listen_addr).await?;
//! let (stream, peer) = listener.accept().await?;
//!
//! let imaging = imaging::build_position_source(&blueprint.imaging)?;
//! let outputs = OutputFactory::new(
//!     blueprint.sinks.clone(),
//!     blueprint.experiment.clone(),
//!     &blueprint.node.channels,
//! );
//! let mut orchestrator = RunOrchestrator::new(
//!     NodeLink::new(stream, peer.to_string()),
//!     TokioWallClock::new(),
//!     imaging,
//!     outputs,
//!     StopSignal::new().with_stop_file("stop.txt"),
//!     SessionSettings::from_blueprint(&blueprint),
//! );
//! let report = orchestrator.run().await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod cadence;
pub mod error;
pub mod handshake;
pub mod orchestrator;
pub mod run;
pub mod settings;
pub mod stop;

#[cfg(test)]
mod testkit;

pub use cadence::{Cadence, Deadline};
pub use error::{Result, SessionError};
pub use handshake::{HandshakeStateMachine, Transition};
pub use orchestrator::{ResetOutcome, RunOrchestrator, SessionEnd, SessionReport};
pub use run::{RunOutcome, RunReport, RunSession};
pub use settings::SessionSettings;
pub use stop::StopSignal;
