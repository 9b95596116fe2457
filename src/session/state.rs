//! Connection and sharing state machines, plus the countdown timer their
//! retries share.
//!
//! Transitions happen in exactly two places: an explicit server reply
//! dispatched by the transport, or a retry budget running out. Nothing is
//! inferred from elapsed time alone.

use serde::{Deserialize, Serialize};

use crate::MAX_RETRY_COUNT;

/// Where the transport stands with the lobby server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session, none requested.
    NotConnecting,
    /// Connect request in flight, awaiting the server's accept.
    Connecting,
    /// Session established; lists and chat are live.
    Connected,
    /// Session established and a game is running; lobby traffic continues.
    Playing,
    /// Disconnect request in flight, awaiting the server's confirmation.
    Disconnecting,
    /// The connect retry budget ran out. Terminal until the caller asks to
    /// connect again.
    UnableToConnect,
}

impl ConnectionState {
    /// True once the server has accepted the session (`Connected` or
    /// `Playing`).
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Self::Connected | Self::Playing)
    }
}

/// Whether this client advertises a hosted game in the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharingState {
    /// Nothing advertised.
    NotSharing,
    /// Share request in flight, awaiting the server's confirmation.
    SharingRequested,
    /// The server lists the game.
    Shared,
    /// Stop-sharing request in flight.
    UnsharingRequested,
}

impl SharingState {
    /// True while the server may still be listing (or about to list) the
    /// game, i.e. anything but `NotSharing`.
    #[must_use]
    pub fn is_engaged(self) -> bool {
        !matches!(self, Self::NotSharing)
    }
}

/// Outcome of one [`RetryTimer::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// The countdown has not elapsed.
    NotDue,
    /// Due, and a send is still budgeted; the caller sends and rearms.
    Resend,
    /// Due with the budget spent; the caller takes its failure transition.
    Exhausted,
}

/// Per-request countdown with a bounded number of sends, the protocol's
/// "time to live" retry accounting. One timer per outstanding request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryTimer {
    ticks_left: u32,
    sends_left: u32,
}

impl RetryTimer {
    /// A timer that fires after `first_delay` ticks and allows the initial
    /// send plus [`MAX_RETRY_COUNT`] retries.
    pub(crate) fn request(first_delay: u32) -> Self {
        Self {
            ticks_left: first_delay,
            sends_left: 1 + MAX_RETRY_COUNT,
        }
    }

    /// A timer with an explicit send budget, for requests that ration their
    /// retries differently.
    pub(crate) fn with_sends(first_delay: u32, sends: u32) -> Self {
        Self {
            ticks_left: first_delay,
            sends_left: sends,
        }
    }

    /// Counts down one tick. On elapse, consumes one budgeted send and
    /// rearms with `interval`, or reports exhaustion if none remain.
    pub(crate) fn tick(&mut self, interval: u32) -> RetryDecision {
        if self.ticks_left > 0 {
            self.ticks_left -= 1;
            return RetryDecision::NotDue;
        }
        if self.sends_left == 0 {
            return RetryDecision::Exhausted;
        }
        self.sends_left -= 1;
        self.ticks_left = interval;
        RetryDecision::Resend
    }
}
