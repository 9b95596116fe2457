//! Mirrors of the server's game and client lists.
//!
//! The server sends additive and removal batches; the transport applies
//! them here. Reconciliation is idempotent: re-adding a known uid and
//! removing an absent one are both no-ops, so a retried batch never
//! corrupts the mirror.

use crate::network::messages::{ClientInfo, GameInfo};

/// Anything the server identifies by a unique id.
pub trait HasUid {
    /// The server-assigned unique id.
    fn uid(&self) -> u32;
}

impl HasUid for GameInfo {
    fn uid(&self) -> u32 {
        self.uid
    }
}

impl HasUid for ClientInfo {
    fn uid(&self) -> u32 {
        self.uid
    }
}

/// One mirrored list plus its edge-triggered "new data" flag.
///
/// The flag is set on every applied batch and cleared only when the caller
/// polls with `reset = true`, so a UI refreshes once per change instead of
/// once per poll.
#[derive(Debug, Clone, Default)]
pub struct Roster<T> {
    entries: Vec<T>,
    fresh: bool,
}

impl<T: HasUid> Roster<T> {
    /// An empty mirror with a clear flag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            fresh: false,
        }
    }

    /// The mirrored entries, in server-announcement order.
    #[must_use]
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// Applies an additive batch. Entries whose uid is already mirrored are
    /// skipped.
    pub fn apply_additions(&mut self, batch: Vec<T>) {
        for entry in batch {
            if !self.entries.iter().any(|e| e.uid() == entry.uid()) {
                self.entries.push(entry);
            }
        }
        self.fresh = true;
    }

    /// Applies a removal batch. Absent uids are no-ops.
    pub fn apply_removals(&mut self, uids: &[u32]) {
        for &uid in uids {
            if let Some(pos) = self.entries.iter().position(|e| e.uid() == uid) {
                self.entries.remove(pos);
            }
        }
        self.fresh = true;
    }

    /// Edge-triggered poll: reports whether new data arrived since the last
    /// reset, clearing the flag only when `reset` is true.
    pub fn take_fresh(&mut self, reset: bool) -> bool {
        if self.fresh {
            if reset {
                self.fresh = false;
            }
            true
        } else {
            false
        }
    }

    /// Drops all entries and clears the flag, e.g. on reconnect.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.fresh = false;
    }
}
