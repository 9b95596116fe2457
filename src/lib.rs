//! # Citadel Lobby
//!
//! The lobby connectivity and order-replication layer of a lockstep
//! real-time strategy game. It has two halves:
//!
//! - A **session transport** ([`SessionTransport`]) that keeps a presence
//!   with a meta-server over UDP: connecting and disconnecting, sharing a
//!   hosted game so other clients can find it, mirroring the server's game
//!   and client lists, and exchanging reliably-delivered chat messages.
//! - An **order codec** ([`order`], [`order::codec`]) for the game commands
//!   every peer replicates and applies in lockstep, plus framing for
//!   persisting those commands to replay files ([`replay`]) and a rolling
//!   checksum to detect simulation divergence ([`desync`]).
//!
//! Everything runs single-threaded and tick-driven: the host application
//! calls [`SessionTransport::step`] once per simulation tick, then polls
//! the edge-triggered flags and drains [`SessionTransport::conditions`].
//! No callbacks, no background threads, no blocking calls.
//!
//! ## Reliability model
//!
//! The transport speaks an unreliable datagram protocol and layers its own
//! retry logic on top: every request that expects a reply carries a tick
//! countdown ([`DEFAULT_NETWORK_TIMEOUT`]) and a retry budget
//! ([`MAX_RETRY_COUNT`]). When the budget runs out, the failure surfaces as
//! a [`LobbyCondition`] rather than an error - the caller decides how to
//! react on its next tick.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::hash::Hash;

pub use desync::ChecksumTally;
pub use error::LobbyError;
pub use network::messages::{ClientInfo, GameInfo, Header, LobbyMessageKind};
pub use network::udp_socket::UdpNonBlockingSocket;
pub use order::{ChatScope, Order, OrderBody, OrderKind};
pub use session::message_queue::ChatMessage;
pub use session::state::{ConnectionState, SharingState};
pub use session::transport::SessionTransport;
pub use session::LobbyCondition;

pub mod desync;
pub mod error;
pub mod order;
pub mod replay;
pub mod session;
pub mod wire;
/// Wire-format datagrams and the socket they travel over.
pub mod network {
    pub mod messages;
    pub mod udp_socket;
}

// #############
// # CONSTANTS #
// #############

/// Ticks to wait for a reply before resending a request.
///
/// At the 25 steps-per-second cadence the simulation runs at, this is a bit
/// over a second.
pub const DEFAULT_NETWORK_TIMEOUT: u32 = 30;

/// Ticks between presence datagrams while idle in the lobby, and between
/// game-socket re-announcements while a shared game waits for joiners.
pub const LONG_NETWORK_TIMEOUT: u32 = 300;

/// How many times a request is retried after its initial send before the
/// transport gives up and raises the matching [`LobbyCondition`].
pub const MAX_RETRY_COUNT: u32 = 3;

/// This [`NonBlockingSocket`] trait is used when you want to drive a
/// [`SessionTransport`] with your own socket - tests in this crate use an
/// in-memory implementation. However you wish to send and receive
/// datagrams, it should be implemented through these two methods.
/// Datagrams are sent in a UDP-like fashion, unordered and unreliable; the
/// transport has its own retry protocol on top to make sure all important
/// information is sent and received.
pub trait NonBlockingSocket<A>
where
    A: Clone + PartialEq + Eq + Hash,
{
    /// Sends one datagram to the given address. Best-effort: implementations
    /// log and swallow transmission failures.
    fn send_to(&mut self, buf: &[u8], addr: &A);

    /// Returns all datagrams received since the last call, without blocking.
    /// The pairs `(A, Vec<u8>)` indicate from which address each datagram
    /// was received.
    fn receive_all(&mut self) -> Vec<(A, Vec<u8>)>;
}
