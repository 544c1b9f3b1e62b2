//! Host side of the Node connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, HostCommand, NodeConfigFrame, NodeMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::error::Result;
use crate::framing::{LineFramed, LineRead};

/// Typed result of one bounded read
///
/// A timeout is expected absence, not an error. Hard faults come back as
/// `Err(TransportError)`.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A decoded frame
    Message(NodeMessage),
    /// Nothing arrived within the read timeout
    Idle,
    /// A frame arrived but could not be decoded
    Malformed { frame: String, error: ContractError },
}

/// Host → Node channel
///
/// Implemented by [`NodeLink`]; tests substitute scripted channels.
#[trait_variant::make(NodeChannel: Send)]
pub trait LocalNodeChannel {
    /// Send the configuration frame (first frame after accept)
    async fn send_config(&mut self, config: &NodeConfigFrame) -> Result<()>;

    /// Send a control token
    async fn send(&mut self, command: HostCommand) -> Result<()>;

    /// Wait at most `timeout` for the next frame
    async fn recv(&mut self, timeout: Duration) -> Result<ReadOutcome>;
}

/// Link counters
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// Frames received (any kind)
    pub frames_in: AtomicU64,
    /// Frames sent
    pub frames_out: AtomicU64,
    /// Frames that failed to decode
    pub malformed: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_in(&self, kind: &'static str) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sync_host_frames_total", "direction" => "in", "kind" => kind)
            .increment(1);
    }

    fn record_out(&self, kind: &'static str) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sync_host_frames_total", "direction" => "out", "kind" => kind)
            .increment(1);
    }

    fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sync_host_protocol_errors_total").increment(1);
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Link counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub frames_in: u64,
    pub frames_out: u64,
    pub malformed: u64,
}

/// Host end of the duplex connection to the Node
pub struct NodeLink<S> {
    framed: LineFramed<S>,
    peer: String,
    metrics: Arc<LinkMetrics>,
}

impl<S> NodeLink<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            framed: LineFramed::new(stream),
            peer: peer.into(),
            metrics: Arc::new(LinkMetrics::new()),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn metrics(&self) -> Arc<LinkMetrics> {
        self.metrics.clone()
    }

    /// Close the write side
    pub async fn shutdown(&mut self) -> Result<()> {
        self.framed.shutdown().await
    }
}

impl<S> NodeChannel for NodeLink<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn send_config(&mut self, config: &NodeConfigFrame) -> Result<()> {
        let frame = config.encode()?;
        debug!(peer = %self.peer, frame = %frame, "Sending node configuration");
        self.framed.send_line(&frame).await?;
        self.metrics.record_out("config");
        Ok(())
    }

    async fn send(&mut self, command: HostCommand) -> Result<()> {
        trace!(peer = %self.peer, command = %command, "Sending command");
        self.framed.send_line(command.token()).await?;
        self.metrics.record_out(command.token());
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        let line = match self.framed.recv_line(timeout).await? {
            LineRead::Idle => return Ok(ReadOutcome::Idle),
            LineRead::Invalid => {
                self.metrics.record_malformed();
                return Ok(ReadOutcome::Malformed {
                    frame: String::new(),
                    error: ContractError::malformed("", "frame is not valid UTF-8"),
                });
            }
            LineRead::Line(line) => line,
        };

        // blank keep-alive lines carry nothing
        if line.trim().is_empty() {
            return Ok(ReadOutcome::Idle);
        }

        match NodeMessage::parse(&line) {
            Ok(message) => {
                self.metrics.record_in(message.kind());
                Ok(ReadOutcome::Message(message))
            }
            Err(error) => {
                self.metrics.record_malformed();
                Ok(ReadOutcome::Malformed { frame: line, error })
            }
        }
    }
}
