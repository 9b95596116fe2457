//! Tick-driven lobby session: connection and sharing state machines, list
//! mirroring, reliable chat delivery and the condition queue the host
//! application polls.

use std::collections::vec_deque::Drain;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

pub mod lists;
pub mod message_queue;
pub mod state;
pub mod transport;

/// Notifications produced by the transport while stepping.
///
/// Conditions are the transport's answer to everything that happens
/// asynchronously to the caller's requests: retry budgets running out,
/// the server closing, a chat message being given up on. They are queued
/// during [`SessionTransport::step`](crate::SessionTransport::step) and
/// drained with [`SessionTransport::conditions`](crate::SessionTransport::conditions);
/// none of them changes transport state beyond what their documentation says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyCondition {
    /// The connect retry budget ran out without any server reply. The
    /// transport is back in `NotConnecting`.
    UnableToConnect,
    /// The server answered a connect request with an explicit refusal.
    ConnectionRefused,
    /// The disconnect retry budget ran out. The transport treats the
    /// session as closed anyway.
    FailedToDisconnect,
    /// The share-game retry budget ran out; the game is not listed.
    FailedToShareGame,
    /// The stop-sharing retry budget ran out; the server may still list
    /// the game until it times the client out.
    FailedToUnshareGame,
    /// The presence retry budget ran out while connected. The server has
    /// stopped answering; the connection is likely dead, but the transport
    /// stays in its current state so the caller chooses when to give up.
    ConnectionLost,
    /// An outgoing chat message exhausted its retry budget and was dropped
    /// from the send queue.
    MessageDropped {
        /// The queue id of the dropped message.
        id: u8,
    },
    /// The joiner-facing game socket announcement exhausted its retry
    /// budget without acknowledgement.
    GameSocketUndelivered,
    /// The server told us it is shutting down. The transport has reset to
    /// `NotConnecting`.
    LobbyClosed,
}

/// A draining iterator over queued [`LobbyCondition`]s.
///
/// Wraps the internal queue drain so the public API does not expose
/// `std::collections::vec_deque::Drain` directly. Obtain one from
/// [`SessionTransport::conditions`](crate::SessionTransport::conditions).
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct ConditionDrain<'a> {
    inner: Drain<'a, LobbyCondition>,
}

impl<'a> ConditionDrain<'a> {
    pub(crate) fn from_drain(inner: Drain<'a, LobbyCondition>) -> Self {
        Self { inner }
    }
}

impl Iterator for ConditionDrain<'_> {
    type Item = LobbyCondition;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ConditionDrain<'_> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FusedIterator for ConditionDrain<'_> {}

impl std::fmt::Debug for ConditionDrain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionDrain")
            .field("remaining", &self.len())
            .finish()
    }
}
