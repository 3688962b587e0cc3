//! Session life-cycle states.

use std::fmt;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Every stage finished and all text was confirmed.
    Clean,
    /// Stopped on an error that is not retried.
    Fatal,
    /// Stopped by the caller before everything was spoken.
    Interrupted,
}

/// Where the session manager is in its retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting { attempt: u32 },
    Streaming { attempt: u32 },
    /// The session closed unexpectedly mid-stream.
    Dropped { attempt: u32 },
    Resyncing { attempt: u32 },
    Closed(CloseKind),
}

impl SessionState {
    /// Whether the manager may move from `self` to `next`.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Connecting { attempt }) => *attempt == 1,
            (Connecting { attempt: a }, Streaming { attempt: b }) => a == b,
            (Streaming { .. }, Closed(_)) => true,
            (Streaming { attempt: a }, Dropped { attempt: b }) => a == b,
            (Dropped { attempt: a }, Resyncing { attempt: b }) => a == b,
            (Resyncing { attempt: a }, Connecting { attempt: b }) => *b == a + 1,
            (Resyncing { .. }, Closed(_)) => true,
            // Resync found nothing left to say, or retries ran out.
            (Dropped { .. }, Closed(_)) => true,
            (Connecting { .. }, Closed(CloseKind::Fatal | CloseKind::Interrupted)) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }

    /// Attempt number this state belongs to, if any.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            SessionState::Connecting { attempt }
            | SessionState::Streaming { attempt }
            | SessionState::Dropped { attempt }
            | SessionState::Resyncing { attempt } => Some(*attempt),
            SessionState::Idle | SessionState::Closed(_) => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            SessionState::Streaming { attempt } => write!(f, "streaming (attempt {attempt})"),
            SessionState::Dropped { attempt } => write!(f, "dropped (attempt {attempt})"),
            SessionState::Resyncing { attempt } => write!(f, "resyncing (attempt {attempt})"),
            SessionState::Closed(CloseKind::Clean) => write!(f, "closed"),
            SessionState::Closed(CloseKind::Fatal) => write!(f, "closed (fatal)"),
            SessionState::Closed(CloseKind::Interrupted) => write!(f, "closed (interrupted)"),
        }
    }
}

/// Records transitions and rejects ones the life cycle does not allow.
#[derive(Debug, Clone)]
pub struct StateTracker {
    current: SessionState,
    history: Vec<SessionState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: SessionState::Idle,
            history: vec![SessionState::Idle],
        }
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SessionState {
        self.current
    }

    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// An illegal transition is a bug in the manager, not a runtime condition,
    /// so it is logged and applied anyway rather than failing the request.
    pub fn transition(&mut self, next: SessionState) {
        if self.current.can_transition_to(&next) {
            tracing::debug!(from = %self.current, to = %next, "session state");
        } else {
            tracing::error!(from = %self.current, to = %next, "unexpected session state transition");
            debug_assert!(false, "illegal transition {} -> {}", self.current, next);
        }
        self.current = next;
        self.history.push(next);
    }

    pub fn into_history(self) -> Vec<SessionState> {
        self.history
    }
}
