//! Reliable chat delivery over the unreliable datagram channel.
//!
//! Outbound messages form a strict FIFO: only the head is ever in flight,
//! resent on the default timeout until the server acknowledges its id or
//! the retry budget runs out. Inbound messages are acknowledged on every
//! arrival (including duplicates) and deduplicated by id before being
//! surfaced.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::network::messages::{LobbyMessageKind, CHAT_TEXT_MAX};
use crate::session::state::{RetryDecision, RetryTimer};

/// A chat message received from the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The server-assigned message id.
    pub id: u8,
    /// How it was addressed: broadcast, private, admin or receipt.
    pub kind: LobbyMessageKind,
    /// The sender's name.
    pub username: String,
    /// The message text.
    pub text: String,
}

/// What the transport should do with the queue head this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeadAction {
    /// (Re)send the head with this id and text.
    Send {
        /// Queue id of the head.
        id: u8,
        /// Its text, already bounded.
        text: String,
    },
    /// The head exhausted its budget and was dropped from the queue.
    Dropped {
        /// Queue id of the dropped message.
        id: u8,
    },
}

/// Result of matching a server ack against the queue head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// The head was acknowledged and removed; the next message becomes head.
    Delivered,
    /// The ack named a message that is not the head; ignored.
    NotHead {
        /// The id currently in flight.
        head_id: u8,
    },
    /// Nothing was in flight.
    QueueEmpty,
}

#[derive(Debug, Clone)]
struct OutboundMessage {
    id: u8,
    text: String,
    timer: RetryTimer,
}

/// The outbound retry queue plus the inbound dedupe set and inbox.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    outbound: VecDeque<OutboundMessage>,
    last_id: u8,
    // Ids stay in the set forever; after the 8-bit id space wraps, a
    // collision silently drops a genuinely new message. Kept for wire
    // compatibility with the deployed server.
    seen_ids: HashSet<u8>,
    inbox: VecDeque<ChatMessage>,
}

impl MessageQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an outbound message and returns its assigned id. Ids are an
    /// 8-bit wrapping sequence starting at 1.
    pub fn enqueue(&mut self, text: &str) -> u8 {
        self.last_id = self.last_id.wrapping_add(1);
        let mut text = text.to_owned();
        if text.len() >= CHAT_TEXT_MAX {
            let mut cut = CHAT_TEXT_MAX - 1;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        self.outbound.push_back(OutboundMessage {
            id: self.last_id,
            text,
            timer: RetryTimer::request(0),
        });
        self.last_id
    }

    /// Counts the head's timer down one tick, discarding empty-text heads
    /// first. Returns the send or drop the transport must perform, if any.
    pub(crate) fn tick_head(&mut self, interval: u32) -> Option<HeadAction> {
        while let Some(head) = self.outbound.front() {
            if head.text.is_empty() {
                self.outbound.pop_front();
            } else {
                break;
            }
        }
        let head = self.outbound.front_mut()?;
        match head.timer.tick(interval) {
            RetryDecision::NotDue => None,
            RetryDecision::Resend => Some(HeadAction::Send {
                id: head.id,
                text: head.text.clone(),
            }),
            RetryDecision::Exhausted => {
                let id = head.id;
                self.outbound.pop_front();
                Some(HeadAction::Dropped { id })
            }
        }
    }

    /// Applies a server `SendMessage` ack.
    pub(crate) fn ack(&mut self, id: u8) -> AckOutcome {
        match self.outbound.front() {
            None => AckOutcome::QueueEmpty,
            Some(head) if head.id == id => {
                self.outbound.pop_front();
                AckOutcome::Delivered
            }
            Some(head) => AckOutcome::NotHead { head_id: head.id },
        }
    }

    /// Accepts one inbound chat message, deduplicating by id. Returns true
    /// if the message was new and is now in the inbox.
    pub(crate) fn accept_inbound(&mut self, message: ChatMessage) -> bool {
        if !self.seen_ids.insert(message.id) {
            return false;
        }
        self.inbox.push_back(message);
        true
    }

    /// True while received messages are waiting to be taken.
    #[must_use]
    pub fn has_messages(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Takes all received messages, oldest first.
    pub fn take_messages(&mut self) -> Vec<ChatMessage> {
        self.inbox.drain(..).collect()
    }

    /// Number of outbound messages still queued, the in-flight head
    /// included.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Drops all queue state, e.g. when a new session starts.
    pub fn clear(&mut self) {
        self.outbound.clear();
        self.last_id = 0;
        self.seen_ids.clear();
        self.inbox.clear();
    }
}
