//! Desync detection across replicated lockstep peers.
//!
//! Every client runs the same simulation from the same order stream; if the
//! simulations ever diverge, the session is unrecoverable and must end. To
//! detect divergence cheaply, each client keeps a rolling tally mixing the
//! per-type constants of the orders it applies (see
//! [`OrderBody::checksum_contribution`]) with whatever state digest the host
//! application feeds in, and periodically submits it to its peers via
//! [`OrderBody::SubmitChecksum`].
//!
//! The order contribution is deliberately weak - a message-type tally, not a
//! content hash. Peers compare running sums, so both sides must compute the
//! identical value; see the note on [`OrderBody::checksum_contribution`].
//!
//! [`OrderBody`]: crate::order::OrderBody
//! [`OrderBody::SubmitChecksum`]: crate::order::OrderBody::SubmitChecksum
//! [`OrderBody::checksum_contribution`]: crate::order::OrderBody::checksum_contribution

use crate::error::LobbyError;
use crate::order::OrderBody;

/// Rolling checksum tally for one replicated session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumTally {
    value: i32,
}

impl ChecksumTally {
    /// A fresh tally, starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one applied order into the tally.
    pub fn record(&mut self, body: &OrderBody) {
        self.value = self.value.wrapping_add(body.checksum_contribution());
    }

    /// Folds an application-supplied state digest into the tally.
    ///
    /// The host calls this once per simulation step with whatever summary of
    /// game state it considers significant; every peer must feed the same
    /// sequence.
    pub fn mix_state(&mut self, digest: i32) {
        self.value = self.value.wrapping_add(digest);
    }

    /// The current tally value, as submitted in
    /// [`SubmitChecksum`](crate::order::OrderBody::SubmitChecksum).
    #[must_use]
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Resets the tally, e.g. at the start of a new session.
    pub fn reset(&mut self) {
        self.value = 0;
    }

    /// Compares the local tally against a value submitted by a peer.
    ///
    /// A mismatch means the replicated simulations have diverged; the error
    /// is fatal to the multiplayer session and not recoverable locally.
    pub fn verify_remote(&self, remote: i32) -> Result<(), LobbyError> {
        if self.value == remote {
            Ok(())
        } else {
            Err(LobbyError::Desync {
                local: self.value,
                remote,
            })
        }
    }
}
