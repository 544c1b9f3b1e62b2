//! Per-run handshake state machine
//!
//! `Idle → AwaitingReady → Syncing → LeadIn → Collecting → Finished`，
//! 任意非终止状态都可以进入 `Aborted`。非法迁移返回类型化错误，
//! 迁移历史保留用于诊断。

use contracts::{AbortReason, HostTime, RunState};
use tracing::{info, warn};

use crate::error::{Result, SessionError};

/// One recorded transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: HostTime,
}

#[derive(Debug, Clone)]
pub struct HandshakeStateMachine {
    run_index: u32,
    state: RunState,
    history: Vec<Transition>,
    abort_reason: Option<AbortReason>,
}

impl HandshakeStateMachine {
    pub fn new(run_index: u32) -> Self {
        Self {
            run_index,
            state: RunState::Idle,
            history: Vec::with_capacity(6),
            abort_reason: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run_index(&self) -> u32 {
        self.run_index
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    /// Whether `from → to` is allowed
    pub fn is_legal(from: RunState, to: RunState) -> bool {
        use RunState::*;
        match (from, to) {
            (Idle, AwaitingReady)
            | (AwaitingReady, Syncing)
            | (Syncing, LeadIn)
            | (LeadIn, Collecting)
            | (Collecting, Finished) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Move to `to`; `Aborted` must go through [`abort`](Self::abort)
    pub fn advance(&mut self, to: RunState, at: HostTime) -> Result<()> {
        if to == RunState::Aborted || !Self::is_legal(self.state, to) {
            return Err(self.invalid(to));
        }
        self.record(to, at);
        Ok(())
    }

    /// Abort from any non-terminal state
    pub fn abort(&mut self, reason: AbortReason, at: HostTime) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.invalid(RunState::Aborted));
        }
        warn!(
            run_index = self.run_index,
            state = %self.state,
            reason = %reason,
            "Run aborted"
        );
        self.abort_reason = Some(reason);
        self.record(RunState::Aborted, at);
        Ok(())
    }

    fn record(&mut self, to: RunState, at: HostTime) {
        let from = self.state;
        info!(run_index = self.run_index, from = %from, to = %to, "State transition");
        observability::record_transition(from, to);
        self.history.push(Transition { from, to, at });
        self.state = to;
    }

    fn invalid(&self, to: RunState) -> SessionError {
        SessionError::InvalidTransition {
            run_index: self.run_index,
            from: self.state,
            to,
        }
    }
}
