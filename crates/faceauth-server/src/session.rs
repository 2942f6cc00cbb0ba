use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingCommand,
    Processing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingCommand => "awaiting_command",
            SessionState::Processing => "processing",
            SessionState::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::AwaitingCommand)
                | (SessionState::AwaitingCommand, SessionState::Processing)
                | (SessionState::Processing, SessionState::AwaitingCommand)
        ) || (next == SessionState::Closed && self != SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection bookkeeping. Owned by the connection task; never shared.
#[derive(Debug)]
pub struct ClientSession {
    id: Uuid,
    peer: SocketAddr,
    state: SessionState,
    requests: u64,
    opened_at: DateTime<Utc>,
}

impl ClientSession {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            state: SessionState::Idle,
            requests: 0,
            opened_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn opened_at(&self) -> String {
        self.opened_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Moves to `next`, returning false (and staying put) when the move is
    /// not allowed.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                target: "server.session",
                session = %self.id,
                from = %self.state,
                to = %next,
                "ignored invalid session transition"
            );
            return false;
        }
        debug!(
            target: "server.session",
            session = %self.id,
            peer = %self.peer,
            from = %self.state,
            to = %next,
            "session state changed"
        );
        if next == SessionState::Processing {
            self.requests += 1;
        }
        self.state = next;
        true
    }
}
