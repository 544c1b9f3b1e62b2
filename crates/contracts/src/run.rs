//! Run lifecycle types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handshake / run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    AwaitingReady,
    Syncing,
    LeadIn,
    Collecting,
    Finished,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finished | RunState::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::AwaitingReady => "awaiting_ready",
            RunState::Syncing => "syncing",
            RunState::LeadIn => "lead_in",
            RunState::Collecting => "collecting",
            RunState::Finished => "finished",
            RunState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `Aborted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// No valid `sync_ts` within the deadline
    SyncTimeout { waited_s: f64 },
    /// Every sync attempt produced a malformed reply
    SyncRejected { attempts: u32 },
    /// Too many consecutive malformed frames
    ProtocolErrors { consecutive: u32 },
    /// Node sent `stop`
    NodeStopped,
    /// Manual stop (signal or stop file)
    ManualStop,
    /// Transport failed
    ConnectionLost { message: String },
}

impl AbortReason {
    /// Handshake failures abort only the current run
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            AbortReason::SyncTimeout { .. } | AbortReason::SyncRejected { .. }
        )
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AbortReason::SyncTimeout { .. } => "sync_timeout",
            AbortReason::SyncRejected { .. } => "sync_rejected",
            AbortReason::ProtocolErrors { .. } => "protocol_errors",
            AbortReason::NodeStopped => "node_stopped",
            AbortReason::ManualStop => "manual_stop",
            AbortReason::ConnectionLost { .. } => "connection_lost",
        }
    }

    /// Whether the remaining runs must be skipped
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            AbortReason::NodeStopped
                | AbortReason::ManualStop
                | AbortReason::ConnectionLost { .. }
        )
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::SyncTimeout { waited_s } => {
                write!(f, "no sync reply within {waited_s:.1}s")
            }
            AbortReason::SyncRejected { attempts } => {
                write!(f, "sync replies malformed after {attempts} attempts")
            }
            AbortReason::ProtocolErrors { consecutive } => {
                write!(f, "{consecutive} consecutive malformed frames")
            }
            AbortReason::NodeStopped => f.write_str("node sent stop"),
            AbortReason::ManualStop => f.write_str("manual stop requested"),
            AbortReason::ConnectionLost { message } => write!(f, "connection lost: {message}"),
        }
    }
}
