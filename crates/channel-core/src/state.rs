//! Channel connection state machine
//!
//! ```text
//! Init -> ResolutionInProgress -> ResolutionDone -> Connecting -> Ready <-> Retry
//!   \________________________________________________________________/
//!                              |
//!                              v
//!                    Error / Disconnected
//! ```
//!
//! Transitions are reported by the transport layer; this crate only checks
//! that a reported transition is legal. The recovery-vs-failure policy a
//! transition triggers lives in one place in the dispatch layer, not here.

use std::fmt;

/// Connection state of a [`crate::Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Init,
    ResolutionInProgress,
    ResolutionDone,
    Connecting,
    Ready,
    Retry,
    Error,
    Disconnected,
}

impl ChannelState {
    /// `Error` and `Disconnected` are terminal; a channel never leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Error | ChannelState::Disconnected)
    }

    /// Whether a channel in this state may be picked for a new exchange.
    pub fn is_selectable(&self) -> bool {
        !self.is_terminal()
    }

    /// Validates a reported transition.
    ///
    /// The terminal states are reachable from any live state; resolution may
    /// be skipped entirely when the peer address is already known.
    pub fn can_transition_to(&self, next: ChannelState) -> bool {
        use ChannelState::*;
        match next {
            Error | Disconnected => !self.is_terminal(),
            Init => false,
            ResolutionInProgress => matches!(self, Init),
            ResolutionDone => matches!(self, Init | ResolutionInProgress),
            Connecting => matches!(self, ResolutionDone),
            Ready => matches!(self, Connecting | Retry),
            Retry => matches!(self, Ready),
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Init => "Init",
            ChannelState::ResolutionInProgress => "ResolutionInProgress",
            ChannelState::ResolutionDone => "ResolutionDone",
            ChannelState::Connecting => "Connecting",
            ChannelState::Ready => "Ready",
            ChannelState::Retry => "Retry",
            ChannelState::Error => "Error",
            ChannelState::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}
