//! The crate-wide error type.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::order::codec::OrderDecodeError;
use crate::order::MismatchedBatch;
use crate::replay::ReplayError;

/// This enum contains all error conditions this library can return to the
/// caller.
///
/// Failures internal to the protocol (malformed packets, retry exhaustion)
/// are deliberately NOT errors: the transport logs and drops malformed
/// datagrams, and retry exhaustion is surfaced as a
/// [`LobbyCondition`](crate::session::LobbyCondition) polled by the caller
/// on the next tick. Nothing crosses the transport/codec boundary as a
/// panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    /// A network socket operation failed.
    Socket {
        /// A description of the socket error.
        context: String,
    },
    /// You made an invalid request, usually by using wrong parameters for
    /// function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// The replicated simulations have diverged: a peer submitted a rolling
    /// checksum that does not match the local one. Fatal to the multiplayer
    /// session; not recoverable locally.
    Desync {
        /// The locally computed tally.
        local: i32,
        /// The value the peer submitted.
        remote: i32,
    },
    /// A received order payload could not be decoded.
    Decode(OrderDecodeError),
    /// A replay/save stream could not be read back.
    Replay(ReplayError),
}

impl Display for LobbyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyError::Socket { context } => {
                write!(f, "Socket error: {}", context)
            }
            LobbyError::InvalidRequest { info } => {
                write!(f, "Invalid request: {}", info)
            }
            LobbyError::Desync { local, remote } => {
                write!(
                    f,
                    "Session desynchronized: local checksum {} != remote checksum {}",
                    local, remote
                )
            }
            LobbyError::Decode(e) => {
                write!(f, "Order decode failed: {}", e)
            }
            LobbyError::Replay(e) => {
                write!(f, "Replay stream error: {}", e)
            }
        }
    }
}

impl Error for LobbyError {}

impl From<OrderDecodeError> for LobbyError {
    fn from(e: OrderDecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<ReplayError> for LobbyError {
    fn from(e: ReplayError) -> Self {
        Self::Replay(e)
    }
}

impl From<MismatchedBatch> for LobbyError {
    fn from(e: MismatchedBatch) -> Self {
        Self::InvalidRequest {
            info: e.to_string(),
        }
    }
}
