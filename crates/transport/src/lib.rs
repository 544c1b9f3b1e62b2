//! # Transport
//!
//! Host 与 Node 之间的换行分隔文本帧链路。
//!
//! Responsibilities:
//! - Newline framing over any `AsyncRead + AsyncWrite` (TCP, in-memory duplex)
//! - Typed read outcomes: message / idle (timeout) / malformed; hard faults as errors
//! - Wall clock that follows the tokio timer
//! - Mock Node for bench and integration testing
//!
//! ## Usage Example
//!
//! ```no_run
//! # async fn demo() -> transport::Result<()> {
//! use std::time::Duration;
//! use contracts::HostCommand;
//! use transport::{NodeChannel, NodeLink, ReadOutcome};
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5005").await?;
//! let (stream, addr) = listener.accept().await?;
//! let mut link = NodeLink::new(stream, addr.to_string());
//!
//! link.send(HostCommand::Start).await?;
//! match link.recv(Duration::from_millis(100)).await? {
//!     ReadOutcome::Message(message) => println!("{}", message.kind()),
//!     ReadOutcome::Idle => {}
//!     ReadOutcome::Malformed { frame, .. } => eprintln!("bad frame {frame:?}"),
//! }
//! # Ok(())
//! # }
//! ```

mod clock;
mod error;
mod framing;
mod link;
mod mock;

pub use clock::TokioWallClock;
pub use error::{Result, TransportError};
pub use framing::{LineFramed, LineRead};
pub use link::{LinkMetrics, LinkSnapshot, LocalNodeChannel, NodeChannel, NodeLink, ReadOutcome};
pub use mock::{NodeReport, SimulatedNode, SimulatedNodeConfig};
