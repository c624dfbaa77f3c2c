//! Per-connection lifecycle states.

/// Server-side connection state.
///
/// A connection only moves forward:
/// `AwaitingRequest → Handshaking → Open → Closing → Closed`, with any state
/// allowed to jump straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Admitted; reading the HTTP upgrade request.
    #[default]
    AwaitingRequest,
    /// Request read; validating it and answering.
    Handshaking,
    /// Upgrade complete; exchanging frames.
    Open,
    /// Close initiated; draining the peer's Close frame.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Check if sending data frames is allowed in this state.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether moving to `next` respects the lifecycle order.
    #[must_use]
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        next == ConnectionState::Closed || next > *self
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::AwaitingRequest => write!(f, "AwaitingRequest"),
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}
