//! The lobby session engine.
//!
//! [`SessionTransport`] keeps a client's standing with the lobby server:
//! the connection and presence state machines, game sharing, mirrored game
//! and client lists, and the reliable chat queue. It is single-threaded
//! and tick-driven - the host application calls [`SessionTransport::step`]
//! once per game-loop iteration, then polls the edge-triggered list flags
//! and drains [`SessionTransport::conditions`].
//!
//! One `step()` runs two phases in a fixed order: first every due timeout
//! (disconnecting, connecting, sharing, message queue, presence,
//! unsharing, game-socket handoff), then all datagrams queued on the
//! socket. A datagram that cancels a pending retry therefore always takes
//! effect before that retry's next resend.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::{debug, trace, warn};

use crate::network::messages::{
    self, Header, LobbyMessageKind, CHAT_TEXT_MAX, GAME_NAME_MAX, USERNAME_MAX,
};
use crate::session::lists::Roster;
use crate::session::message_queue::{AckOutcome, ChatMessage, HeadAction, MessageQueue};
use crate::session::state::{ConnectionState, RetryDecision, RetryTimer, SharingState};
use crate::session::{ConditionDrain, LobbyCondition};
use crate::wire::WireWriter;
use crate::{
    ClientInfo, GameInfo, NonBlockingSocket, DEFAULT_NETWORK_TIMEOUT, LONG_NETWORK_TIMEOUT,
    MAX_RETRY_COUNT,
};

// The connect and presence timers start phase-shifted so a freshly enabled
// session does not fire every request class on the same tick.
const CONNECT_PHASE_OFFSET: u32 = 4;
const PRESENCE_PHASE_OFFSET: u32 = 8;

/// Periodic keepalive with its own budget. Exhaustion is reported once and
/// does not force a state transition; any presence reply refills it.
#[derive(Debug, Clone, Copy)]
struct PresenceKeepalive {
    ticks_left: u32,
    budget: u32,
    lost_reported: bool,
}

impl PresenceKeepalive {
    fn armed() -> Self {
        Self {
            ticks_left: PRESENCE_PHASE_OFFSET,
            budget: MAX_RETRY_COUNT,
            lost_reported: false,
        }
    }

    fn refill(&mut self) {
        self.budget = MAX_RETRY_COUNT;
        self.lost_reported = false;
    }
}

/// The joiner-facing socket being announced to the server, with its own
/// retry accounting independent of the sharing state machine.
#[derive(Debug)]
struct GameSocketHandoff<S> {
    socket: S,
    ticks_left: u32,
    sends_left: u32,
    delivered: bool,
    undelivered_reported: bool,
}

impl<S> GameSocketHandoff<S> {
    fn new(socket: S) -> Self {
        Self {
            socket,
            ticks_left: 0,
            sends_left: 1 + MAX_RETRY_COUNT,
            delivered: false,
            undelivered_reported: false,
        }
    }

    fn confirm(&mut self) {
        self.delivered = true;
        self.ticks_left = LONG_NETWORK_TIMEOUT;
        self.sends_left = MAX_RETRY_COUNT;
    }
}

/// The lobby session protocol engine, generic over the socket it speaks
/// through. Production code uses
/// [`UdpNonBlockingSocket`](crate::UdpNonBlockingSocket); tests drive it
/// with an in-memory implementation of [`NonBlockingSocket`].
#[derive(Debug)]
pub struct SessionTransport<A, S>
where
    A: Clone + PartialEq + Eq + Hash + Debug,
    S: NonBlockingSocket<A>,
{
    socket: S,
    server_addr: A,
    username: String,
    connection: ConnectionState,
    connection_timer: RetryTimer,
    sharing: SharingState,
    sharing_timer: RetryTimer,
    game_name: String,
    presence: PresenceKeepalive,
    game_socket: Option<GameSocketHandoff<S>>,
    messages: MessageQueue,
    games: Roster<GameInfo>,
    clients: Roster<ClientInfo>,
    joined_game: bool,
    conditions: VecDeque<LobbyCondition>,
}

impl<A, S> SessionTransport<A, S>
where
    A: Clone + PartialEq + Eq + Hash + Debug,
    S: NonBlockingSocket<A>,
{
    /// Creates an idle transport speaking to `server_addr` through
    /// `socket`. No datagram is sent until
    /// [`enable_connection`](Self::enable_connection).
    pub fn new(socket: S, server_addr: A) -> Self {
        Self {
            socket,
            server_addr,
            username: String::new(),
            connection: ConnectionState::NotConnecting,
            connection_timer: RetryTimer::request(0),
            sharing: SharingState::NotSharing,
            sharing_timer: RetryTimer::request(0),
            game_name: String::new(),
            presence: PresenceKeepalive::armed(),
            game_socket: None,
            messages: MessageQueue::new(),
            games: Roster::new(),
            clients: Roster::new(),
            joined_game: false,
            conditions: VecDeque::new(),
        }
    }

    // ###################
    // # REQUESTS        #
    // ###################

    /// Starts a session as `username`: resets every per-session counter and
    /// mirror, then begins the connect handshake. Without any server reply,
    /// exactly `1 + MAX_RETRY_COUNT` connect datagrams go out before the
    /// transport settles in `UnableToConnect`.
    pub fn enable_connection(&mut self, username: &str) {
        self.username = bounded(username, USERNAME_MAX);
        self.connection = ConnectionState::Connecting;
        self.connection_timer = RetryTimer::request(CONNECT_PHASE_OFFSET);
        self.sharing = SharingState::NotSharing;
        self.presence = PresenceKeepalive::armed();
        self.game_socket = None;
        self.messages.clear();
        self.games.clear();
        self.clients.clear();
        self.joined_game = false;
        debug!("enabling connection as {:?}", self.username);
    }

    /// Requests an orderly disconnect. From an established session the
    /// usual retry budget applies; from a handshake still in flight a
    /// single datagram is spent. Teardown completes on a later tick, once
    /// any in-progress sharing has unwound.
    pub fn deconnect(&mut self) {
        match self.connection {
            ConnectionState::Connected | ConnectionState::Playing => {
                self.connection = ConnectionState::Disconnecting;
                self.connection_timer = RetryTimer::request(0);
            }
            ConnectionState::Connecting => {
                self.connection = ConnectionState::Disconnecting;
                self.connection_timer = RetryTimer::with_sends(0, 1);
            }
            other => {
                warn!("deconnect() ignored in state {:?}", other);
                return;
            }
        }
        if self.sharing.is_engaged() {
            self.sharing = SharingState::UnsharingRequested;
            self.sharing_timer = RetryTimer::request(0);
        }
        debug!("disconnect requested");
    }

    /// Advertises a hosted game under `name`. The request is (re)sent on
    /// the default timeout until the server confirms or the budget runs
    /// out, which reverts to `NotSharing` with
    /// [`LobbyCondition::FailedToShareGame`].
    pub fn share_game(&mut self, name: &str) {
        self.game_name = bounded(name, GAME_NAME_MAX);
        self.sharing = SharingState::SharingRequested;
        self.sharing_timer = RetryTimer::request(0);
        debug!("sharing game {:?}", self.game_name);
    }

    /// Withdraws the advertised game, from any sharing state, and discards
    /// any pending game-socket handoff.
    pub fn unshare_game(&mut self) {
        self.sharing = SharingState::UnsharingRequested;
        self.sharing_timer = RetryTimer::request(0);
        self.game_socket = None;
        debug!("unsharing game");
    }

    /// Hands over the socket joiners will reach the hosted game on. The
    /// transport announces it to the server *from that socket*, so the
    /// server learns its public address; the announcement has its own retry
    /// budget, independent of the sharing retries.
    pub fn set_game_socket(&mut self, socket: S) {
        if !self.sharing.is_engaged() {
            warn!("set_game_socket() while not sharing, state {:?}", self.sharing);
        }
        self.game_socket = Some(GameSocketHandoff::new(socket));
    }

    /// True once the server has confirmed it learned the game socket's
    /// address.
    #[must_use]
    pub fn game_socket_delivered(&self) -> bool {
        self.game_socket.as_ref().is_some_and(|h| h.delivered)
    }

    /// Queues a chat message for reliable delivery and returns its 8-bit
    /// queue id. Messages go out strictly in order, one in flight at a
    /// time.
    pub fn send_message(&mut self, text: &str) -> u8 {
        self.messages.enqueue(text)
    }

    /// Marks the lobby session as joined to someone else's game. Valid only
    /// while connected and not sharing.
    pub fn join_game(&mut self) {
        if !self.connection.is_online() || self.sharing.is_engaged() {
            warn!(
                "join_game() in state {:?}/{:?}",
                self.connection, self.sharing
            );
        }
        self.joined_game = true;
    }

    /// Clears the joined-game mark.
    pub fn unjoin_game(&mut self) {
        if !self.joined_game {
            warn!("unjoin_game() without a joined game");
        }
        self.joined_game = false;
    }

    /// Moves `Connected` to `Playing` when a game starts. Lobby traffic
    /// (presence, chat, lists) continues while playing.
    pub fn game_started(&mut self) {
        if self.connection == ConnectionState::Connected {
            self.connection = ConnectionState::Playing;
        } else {
            warn!("game_started() in state {:?}", self.connection);
        }
    }

    /// Moves `Playing` back to `Connected` when a game ends.
    pub fn game_ended(&mut self) {
        if self.connection == ConnectionState::Playing {
            self.connection = ConnectionState::Connected;
        } else {
            warn!("game_ended() in state {:?}", self.connection);
        }
    }

    // ###################
    // # POLLING         #
    // ###################

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// True while this client is marked as joined to someone else's game.
    #[must_use]
    pub fn has_joined_game(&self) -> bool {
        self.joined_game
    }

    /// Current sharing state.
    #[must_use]
    pub fn sharing_state(&self) -> SharingState {
        self.sharing
    }

    /// The mirrored list of shared games.
    #[must_use]
    pub fn games(&self) -> &[GameInfo] {
        self.games.entries()
    }

    /// The mirrored list of lobby clients.
    #[must_use]
    pub fn clients(&self) -> &[ClientInfo] {
        self.clients.entries()
    }

    /// Edge-triggered poll of the game-list flag; clears it only when
    /// `reset` is true.
    pub fn new_game_list(&mut self, reset: bool) -> bool {
        self.games.take_fresh(reset)
    }

    /// Edge-triggered poll of the client-list flag; clears it only when
    /// `reset` is true.
    pub fn new_client_list(&mut self, reset: bool) -> bool {
        self.clients.take_fresh(reset)
    }

    /// True while received chat messages are waiting to be taken.
    #[must_use]
    pub fn has_messages(&self) -> bool {
        self.messages.has_messages()
    }

    /// Takes all received chat messages, oldest first.
    pub fn take_messages(&mut self) -> Vec<ChatMessage> {
        self.messages.take_messages()
    }

    /// Drains the conditions queued since the last call.
    pub fn conditions(&mut self) -> ConditionDrain<'_> {
        ConditionDrain::from_drain(self.conditions.drain(..))
    }

    // ###################
    // # TICK            #
    // ###################

    /// Advances the session by one tick: evaluates every due timeout in
    /// fixed order, then drains and dispatches all queued inbound
    /// datagrams.
    pub fn step(&mut self) {
        self.step_disconnecting();
        self.step_connecting();
        self.step_sharing();
        self.step_messages();
        self.step_presence();
        self.step_unsharing();
        self.step_game_socket();

        for (addr, datagram) in self.socket.receive_all() {
            if addr != self.server_addr {
                trace!("ignoring datagram from non-server address {:?}", addr);
                continue;
            }
            self.handle_datagram(&datagram);
        }
    }

    fn step_disconnecting(&mut self) {
        // The disconnect request waits for sharing to unwind first; its
        // timer does not even run until then.
        if self.connection != ConnectionState::Disconnecting || self.sharing.is_engaged() {
            return;
        }
        match self.connection_timer.tick(DEFAULT_NETWORK_TIMEOUT) {
            RetryDecision::NotDue => {}
            RetryDecision::Resend => {
                trace!("sending disconnect request");
                self.send_header(Header::new(LobbyMessageKind::Deconnecting));
            }
            RetryDecision::Exhausted => {
                warn!("disconnect unacknowledged, giving the session up");
                self.connection = ConnectionState::NotConnecting;
                self.conditions.push_back(LobbyCondition::FailedToDisconnect);
            }
        }
    }

    fn step_connecting(&mut self) {
        if self.connection != ConnectionState::Connecting {
            return;
        }
        match self.connection_timer.tick(DEFAULT_NETWORK_TIMEOUT) {
            RetryDecision::NotDue => {}
            RetryDecision::Resend => {
                trace!("sending connection request");
                let mut w = WireWriter::new();
                w.write_bounded_string(&self.username, USERNAME_MAX);
                self.send_with_payload(Header::new(LobbyMessageKind::Connecting), w.as_slice());
            }
            RetryDecision::Exhausted => {
                warn!("connect retries exhausted");
                self.connection = ConnectionState::UnableToConnect;
                self.conditions.push_back(LobbyCondition::UnableToConnect);
            }
        }
    }

    fn step_sharing(&mut self) {
        if !self.connection.is_online() || self.sharing != SharingState::SharingRequested {
            return;
        }
        match self.sharing_timer.tick(DEFAULT_NETWORK_TIMEOUT) {
            RetryDecision::NotDue => {}
            RetryDecision::Resend => {
                trace!("sending share-game request for {:?}", self.game_name);
                let mut w = WireWriter::new();
                w.write_bounded_string(&self.game_name, GAME_NAME_MAX);
                self.send_with_payload(Header::new(LobbyMessageKind::SharingGame), w.as_slice());
            }
            RetryDecision::Exhausted => {
                warn!("share-game retries exhausted");
                self.sharing = SharingState::NotSharing;
                self.conditions.push_back(LobbyCondition::FailedToShareGame);
            }
        }
    }

    fn step_messages(&mut self) {
        if !self.connection.is_online() {
            return;
        }
        match self.messages.tick_head(DEFAULT_NETWORK_TIMEOUT) {
            None => {}
            Some(HeadAction::Send { id, text }) => {
                trace!("sending chat message {}", id);
                let mut w = WireWriter::new();
                w.write_bounded_string(&text, CHAT_TEXT_MAX);
                self.send_with_payload(
                    Header::with_id(LobbyMessageKind::SendMessage, id),
                    w.as_slice(),
                );
            }
            Some(HeadAction::Dropped { id }) => {
                warn!("chat message {} exhausted its retries, dropped", id);
                self.conditions
                    .push_back(LobbyCondition::MessageDropped { id });
            }
        }
    }

    fn step_presence(&mut self) {
        if !self.connection.is_online() {
            return;
        }
        if self.presence.ticks_left > 0 {
            self.presence.ticks_left -= 1;
            return;
        }
        self.presence.ticks_left = LONG_NETWORK_TIMEOUT;
        if self.presence.budget == 0 {
            if !self.presence.lost_reported {
                warn!("presence unanswered, connection presumed lost");
                self.presence.lost_reported = true;
                self.conditions.push_back(LobbyCondition::ConnectionLost);
            }
        } else {
            self.presence.budget -= 1;
            trace!("sending presence heartbeat");
            self.send_header(Header::new(LobbyMessageKind::ConnectionPresence));
        }
    }

    fn step_unsharing(&mut self) {
        // Unsharing keeps running even while disconnecting, so teardown can
        // finish behind it.
        if self.sharing != SharingState::UnsharingRequested {
            return;
        }
        match self.sharing_timer.tick(DEFAULT_NETWORK_TIMEOUT) {
            RetryDecision::NotDue => {}
            RetryDecision::Resend => {
                trace!("sending stop-sharing request");
                self.send_header(Header::new(LobbyMessageKind::StopSharingGame));
            }
            RetryDecision::Exhausted => {
                warn!("stop-sharing retries exhausted");
                self.sharing = SharingState::NotSharing;
                self.conditions.push_back(LobbyCondition::FailedToUnshareGame);
            }
        }
    }

    fn step_game_socket(&mut self) {
        let Some(handoff) = self.game_socket.as_mut() else {
            return;
        };
        if handoff.ticks_left > 0 {
            handoff.ticks_left -= 1;
            return;
        }
        handoff.ticks_left = LONG_NETWORK_TIMEOUT;
        if handoff.delivered {
            // Keepalive so the server keeps the address fresh.
            handoff
                .socket
                .send_to(&Header::new(LobbyMessageKind::GameSocket).encode(), &self.server_addr);
        } else if handoff.sends_left == 0 {
            if !handoff.undelivered_reported {
                warn!("game socket announcement unacknowledged");
                handoff.undelivered_reported = true;
                self.conditions
                    .push_back(LobbyCondition::GameSocketUndelivered);
            }
        } else {
            handoff.sends_left -= 1;
            trace!("announcing game socket to the server");
            handoff
                .socket
                .send_to(&Header::new(LobbyMessageKind::GameSocket).encode(), &self.server_addr);
        }
    }

    // ###################
    // # INBOUND         #
    // ###################

    fn handle_datagram(&mut self, datagram: &[u8]) {
        let (header, payload) = match Header::parse(datagram) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("dropping malformed datagram: {}", err);
                return;
            }
        };
        match header.kind {
            LobbyMessageKind::Bad => warn!("server flagged our last datagram as bad"),
            kind if kind.is_chat() => self.handle_chat(kind, header.id, payload),
            LobbyMessageKind::SendMessage => match self.messages.ack(header.id) {
                AckOutcome::Delivered => debug!("chat message {} delivered", header.id),
                AckOutcome::NotHead { head_id } => warn!(
                    "ack for message {} but message {} is in flight",
                    header.id, head_id
                ),
                AckOutcome::QueueEmpty => trace!("ack for message {} with empty queue", header.id),
            },
            LobbyMessageKind::Connecting => {
                if self.connection == ConnectionState::Connecting {
                    debug!("server accepted the connection");
                    self.connection = ConnectionState::Connected;
                } else {
                    trace!("connection accept ignored in state {:?}", self.connection);
                }
            }
            LobbyMessageKind::ConnectionRefused => {
                if self.connection == ConnectionState::Connecting {
                    warn!("server refused the connection");
                    self.connection = ConnectionState::NotConnecting;
                    self.conditions.push_back(LobbyCondition::ConnectionRefused);
                } else {
                    trace!("connection refusal ignored in state {:?}", self.connection);
                }
            }
            LobbyMessageKind::Deconnecting => {
                if self.connection == ConnectionState::Disconnecting {
                    debug!("server confirmed the disconnect");
                    self.connection = ConnectionState::NotConnecting;
                } else {
                    trace!("disconnect confirmation ignored in state {:?}", self.connection);
                }
            }
            LobbyMessageKind::SharingGame => {
                if self.sharing == SharingState::SharingRequested {
                    debug!("server listed game {:?}", self.game_name);
                    self.sharing = SharingState::Shared;
                } else {
                    trace!("sharing confirmation ignored in state {:?}", self.sharing);
                }
            }
            LobbyMessageKind::StopSharingGame => {
                if self.sharing.is_engaged() {
                    debug!("server unlisted game {:?}", self.game_name);
                    self.sharing = SharingState::NotSharing;
                }
            }
            LobbyMessageKind::GamesList => match messages::decode_games_list(payload) {
                Ok(batch) => {
                    debug!("received a games list of {}", batch.len());
                    self.ack_list(LobbyMessageKind::GamesList, batch.len());
                    self.games.apply_additions(batch);
                }
                Err(err) => warn!("dropping bad games list: {}", err),
            },
            LobbyMessageKind::UnsharedList => match messages::decode_uid_list(payload) {
                Ok(uids) => {
                    debug!("received an unshared list of {}", uids.len());
                    self.ack_list(LobbyMessageKind::UnsharedList, uids.len());
                    self.games.apply_removals(&uids);
                }
                Err(err) => warn!("dropping bad unshared list: {}", err),
            },
            LobbyMessageKind::ConnectionPresence => {
                trace!("presence acknowledged");
                self.presence.refill();
            }
            LobbyMessageKind::GameSocket => {
                if let Some(handoff) = self.game_socket.as_mut() {
                    debug!("server learned the game socket address");
                    handoff.confirm();
                } else {
                    trace!("game socket confirmation with no handoff pending");
                }
            }
            LobbyMessageKind::ClientsList => match messages::decode_clients_list(payload) {
                Ok(batch) => {
                    debug!("received a clients list of {}", batch.len());
                    self.ack_list(LobbyMessageKind::ClientsList, batch.len());
                    self.clients.apply_additions(batch);
                }
                Err(err) => warn!("dropping bad clients list: {}", err),
            },
            LobbyMessageKind::LeftClientsList => match messages::decode_left_clients(payload) {
                Ok((packet_id, uids)) => {
                    debug!("received a left-clients list of {}", uids.len());
                    let mut w = WireWriter::new();
                    w.write_u32(packet_id);
                    self.send_with_payload(
                        Header::with_id(LobbyMessageKind::LeftClientsList, count_byte(uids.len())),
                        w.as_slice(),
                    );
                    self.clients.apply_removals(&uids);
                }
                Err(err) => warn!("dropping bad left-clients list: {}", err),
            },
            LobbyMessageKind::CloseLobby => {
                warn!("server is closing the lobby");
                self.connection = ConnectionState::NotConnecting;
                self.sharing = SharingState::NotSharing;
                self.game_socket = None;
                self.conditions.push_back(LobbyCondition::LobbyClosed);
            }
            // is_chat covers these four above; unreachable only by the
            // match guard, so keep the compiler satisfied.
            LobbyMessageKind::Broadcast
            | LobbyMessageKind::Private
            | LobbyMessageKind::Admin
            | LobbyMessageKind::PrivateReceipt => {}
        }
    }

    fn handle_chat(&mut self, kind: LobbyMessageKind, id: u8, payload: &[u8]) {
        // Every inbound chat datagram is acknowledged, duplicates included,
        // so the server's own retries stop.
        self.send_header(Header::with_id(LobbyMessageKind::Broadcast, id));
        match messages::decode_chat(payload) {
            Ok((text, username)) => {
                let fresh = self.messages.accept_inbound(ChatMessage {
                    id,
                    kind,
                    username,
                    text,
                });
                if fresh {
                    debug!("new chat message {}", id);
                } else {
                    trace!("duplicate chat message {}", id);
                }
            }
            Err(err) => warn!("dropping bad chat payload: {}", err),
        }
    }

    // ###################
    // # SEND HELPERS    #
    // ###################

    fn send_header(&mut self, header: Header) {
        self.socket.send_to(&header.encode(), &self.server_addr);
    }

    fn send_with_payload(&mut self, header: Header, payload: &[u8]) {
        let mut buf = Vec::with_capacity(header.encode().len() + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(payload);
        self.socket.send_to(&buf, &self.server_addr);
    }

    fn ack_list(&mut self, kind: LobbyMessageKind, count: usize) {
        self.send_header(Header::with_id(kind, count_byte(count)));
    }
}

fn bounded(text: &str, max_with_terminator: usize) -> String {
    let mut text = text.to_owned();
    if text.len() >= max_with_terminator {
        let mut cut = max_with_terminator - 1;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

// List acks carry the batch count in the header's id byte.
fn count_byte(count: usize) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    type Addr = u8;
    const SERVER: Addr = 1;

    /// Records outbound datagrams and replays scripted inbound ones.
    #[derive(Debug, Default)]
    struct ScriptedSocket {
        sent: Vec<(Addr, Vec<u8>)>,
        inbound: VecDeque<(Addr, Vec<u8>)>,
    }

    impl NonBlockingSocket<Addr> for ScriptedSocket {
        fn send_to(&mut self, buf: &[u8], addr: &Addr) {
            self.sent.push((*addr, buf.to_vec()));
        }

        fn receive_all(&mut self) -> Vec<(Addr, Vec<u8>)> {
            self.inbound.drain(..).collect()
        }
    }

    fn transport() -> SessionTransport<Addr, ScriptedSocket> {
        SessionTransport::new(ScriptedSocket::default(), SERVER)
    }

    fn server_says(t: &mut SessionTransport<Addr, ScriptedSocket>, datagram: Vec<u8>) {
        t.socket.inbound.push_back((SERVER, datagram));
    }

    fn sent_kinds(t: &SessionTransport<Addr, ScriptedSocket>) -> Vec<u8> {
        t.socket.sent.iter().map(|(_, d)| d[0]).collect()
    }

    fn connect(t: &mut SessionTransport<Addr, ScriptedSocket>) {
        t.enable_connection("alice");
        server_says(t, Header::new(LobbyMessageKind::Connecting).encode().to_vec());
        for _ in 0..=CONNECT_PHASE_OFFSET {
            t.step();
        }
        assert_eq!(t.connection_state(), ConnectionState::Connected);
        t.socket.sent.clear();
    }

    #[test]
    fn idle_transport_sends_nothing() {
        let mut t = transport();
        for _ in 0..100 {
            t.step();
        }
        assert!(t.socket.sent.is_empty());
    }

    #[test]
    fn unanswered_connect_sends_exactly_four_datagrams() {
        let mut t = transport();
        t.enable_connection("alice");
        for _ in 0..1000 {
            t.step();
        }
        assert_eq!(t.connection_state(), ConnectionState::UnableToConnect);
        let connects = sent_kinds(&t)
            .iter()
            .filter(|&&k| k == LobbyMessageKind::Connecting.tag())
            .count();
        assert_eq!(connects, 1 + MAX_RETRY_COUNT as usize);
        assert_eq!(
            t.conditions().collect::<Vec<_>>(),
            vec![LobbyCondition::UnableToConnect]
        );
    }

    #[test]
    fn connect_request_carries_the_username() {
        let mut t = transport();
        t.enable_connection("alice");
        for _ in 0..=CONNECT_PHASE_OFFSET {
            t.step();
        }
        let (addr, datagram) = &t.socket.sent[0];
        assert_eq!(*addr, SERVER);
        assert_eq!(datagram[0], LobbyMessageKind::Connecting.tag());
        assert_eq!(&datagram[4..], b"alice\0");
    }

    #[test]
    fn server_accept_moves_to_connected_within_the_first_window() {
        let mut t = transport();
        t.enable_connection("alice");
        t.step();
        server_says(&mut t, Header::new(LobbyMessageKind::Connecting).encode().to_vec());
        t.step();
        assert_eq!(t.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn refusal_surfaces_a_condition_and_resets() {
        let mut t = transport();
        t.enable_connection("alice");
        server_says(
            &mut t,
            Header::new(LobbyMessageKind::ConnectionRefused).encode().to_vec(),
        );
        t.step();
        assert_eq!(t.connection_state(), ConnectionState::NotConnecting);
        assert_eq!(
            t.conditions().collect::<Vec<_>>(),
            vec![LobbyCondition::ConnectionRefused]
        );
    }

    #[test]
    fn share_then_ack_reaches_shared() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        t.step();
        assert_eq!(t.sharing_state(), SharingState::SharingRequested);
        let (_, datagram) = &t.socket.sent[0];
        assert_eq!(datagram[0], LobbyMessageKind::SharingGame.tag());
        assert_eq!(&datagram[4..], b"my game\0");

        server_says(&mut t, Header::new(LobbyMessageKind::SharingGame).encode().to_vec());
        t.step();
        assert_eq!(t.sharing_state(), SharingState::Shared);
    }

    #[test]
    fn unanswered_share_reverts_with_a_condition() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        for _ in 0..1000 {
            t.step();
        }
        assert_eq!(t.sharing_state(), SharingState::NotSharing);
        assert!(t
            .conditions()
            .any(|c| c == LobbyCondition::FailedToShareGame));
    }

    #[test]
    fn disconnect_waits_for_unsharing() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        server_says(&mut t, Header::new(LobbyMessageKind::SharingGame).encode().to_vec());
        t.step();
        t.socket.sent.clear();

        t.deconnect();
        t.step();
        // Only the stop-sharing request goes out while sharing unwinds.
        assert_eq!(sent_kinds(&t), vec![LobbyMessageKind::StopSharingGame.tag()]);

        server_says(
            &mut t,
            Header::new(LobbyMessageKind::StopSharingGame).encode().to_vec(),
        );
        t.step();
        t.step();
        assert!(sent_kinds(&t).contains(&LobbyMessageKind::Deconnecting.tag()));

        server_says(&mut t, Header::new(LobbyMessageKind::Deconnecting).encode().to_vec());
        t.step();
        assert_eq!(t.connection_state(), ConnectionState::NotConnecting);
    }

    #[test]
    fn unanswered_disconnect_gives_the_session_up() {
        let mut t = transport();
        connect(&mut t);
        t.deconnect();
        for _ in 0..1000 {
            t.step();
        }
        assert_eq!(t.connection_state(), ConnectionState::NotConnecting);
        let disconnects = sent_kinds(&t)
            .iter()
            .filter(|&&k| k == LobbyMessageKind::Deconnecting.tag())
            .count();
        assert_eq!(disconnects, 1 + MAX_RETRY_COUNT as usize);
        assert_eq!(
            t.conditions().collect::<Vec<_>>(),
            vec![LobbyCondition::FailedToDisconnect]
        );
    }

    #[test]
    fn disconnect_from_a_pending_handshake_spends_one_send() {
        let mut t = transport();
        t.enable_connection("alice");
        t.step();
        t.deconnect();
        for _ in 0..200 {
            t.step();
        }
        let kinds = sent_kinds(&t);
        assert!(!kinds.contains(&LobbyMessageKind::Connecting.tag()));
        let disconnects = kinds
            .iter()
            .filter(|&&k| k == LobbyMessageKind::Deconnecting.tag())
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(t.connection_state(), ConnectionState::NotConnecting);
        assert_eq!(
            t.conditions().collect::<Vec<_>>(),
            vec![LobbyCondition::FailedToDisconnect]
        );
    }

    #[test]
    fn unanswered_stop_sharing_reverts_with_a_condition() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        server_says(&mut t, Header::new(LobbyMessageKind::SharingGame).encode().to_vec());
        t.step();
        t.socket.sent.clear();

        t.unshare_game();
        for _ in 0..1000 {
            t.step();
        }
        assert_eq!(t.sharing_state(), SharingState::NotSharing);
        let stops = sent_kinds(&t)
            .iter()
            .filter(|&&k| k == LobbyMessageKind::StopSharingGame.tag())
            .count();
        assert_eq!(stops, 1 + MAX_RETRY_COUNT as usize);
        assert!(t
            .conditions()
            .any(|c| c == LobbyCondition::FailedToUnshareGame));
    }

    #[test]
    fn games_list_is_mirrored_and_acked() {
        let mut t = transport();
        connect(&mut t);
        let games = vec![GameInfo {
            host_ip: std::net::Ipv4Addr::new(10, 0, 0, 2),
            host_port: 4242,
            uid: 7,
            username: "bob".to_owned(),
            name: "hills".to_owned(),
        }];
        let mut datagram = Header::new(LobbyMessageKind::GamesList).encode().to_vec();
        datagram.extend_from_slice(&messages::encode_games_list(&games));
        server_says(&mut t, datagram);
        t.step();

        assert_eq!(t.games(), &games[..]);
        assert!(t.new_game_list(true));
        assert!(!t.new_game_list(true));
        // Ack echoes the kind with the count in the id byte.
        let (_, ack) = t.socket.sent.last().unwrap();
        assert_eq!(ack[..2], [LobbyMessageKind::GamesList.tag(), 1]);
    }

    #[test]
    fn short_games_list_is_rejected_without_state_change() {
        let mut t = transport();
        connect(&mut t);
        let mut datagram = Header::new(LobbyMessageKind::GamesList).encode().to_vec();
        // Declares two games, carries none.
        datagram.extend_from_slice(&[0, 0, 0, 2]);
        server_says(&mut t, datagram);
        t.step();

        assert!(t.games().is_empty());
        assert!(!t.new_game_list(true));
    }

    #[test]
    fn left_clients_ack_echoes_the_packet_id() {
        let mut t = transport();
        connect(&mut t);
        let mut datagram = Header::new(LobbyMessageKind::ClientsList).encode().to_vec();
        datagram.extend_from_slice(&messages::encode_clients_list(&[ClientInfo {
            uid: 3,
            username: "carol".to_owned(),
        }]));
        server_says(&mut t, datagram);
        t.step();
        t.socket.sent.clear();

        let mut datagram = Header::new(LobbyMessageKind::LeftClientsList).encode().to_vec();
        datagram.extend_from_slice(&messages::encode_left_clients(0xDEADBEEF, &[3]));
        server_says(&mut t, datagram);
        t.step();

        assert!(t.clients().is_empty());
        let (_, ack) = t.socket.sent.last().unwrap();
        assert_eq!(ack[..2], [LobbyMessageKind::LeftClientsList.tag(), 1]);
        assert_eq!(&ack[4..], &0xDEADBEEF_u32.to_be_bytes());
    }

    #[test]
    fn presence_budget_refills_on_reply() {
        let mut t = transport();
        connect(&mut t);
        // Run long enough for every budgeted heartbeat to go out, answering
        // each one.
        for _ in 0..(4 * LONG_NETWORK_TIMEOUT + 100) {
            let presence_sent = t
                .socket
                .sent
                .iter()
                .any(|(_, d)| d[0] == LobbyMessageKind::ConnectionPresence.tag());
            if presence_sent {
                t.socket.sent.clear();
                server_says(
                    &mut t,
                    Header::new(LobbyMessageKind::ConnectionPresence).encode().to_vec(),
                );
            }
            t.step();
        }
        assert!(!t.conditions().any(|c| c == LobbyCondition::ConnectionLost));
    }

    #[test]
    fn unanswered_presence_reports_connection_lost_once() {
        let mut t = transport();
        connect(&mut t);
        for _ in 0..(6 * LONG_NETWORK_TIMEOUT) {
            t.step();
        }
        assert_eq!(t.connection_state(), ConnectionState::Connected);
        let lost = t
            .conditions()
            .filter(|&c| c == LobbyCondition::ConnectionLost)
            .count();
        assert_eq!(lost, 1);
    }

    #[test]
    fn inbound_chat_is_acked_and_deduplicated() {
        let mut t = transport();
        connect(&mut t);
        let mut datagram = Header::with_id(LobbyMessageKind::Broadcast, 9).encode().to_vec();
        datagram.extend_from_slice(&messages::encode_chat("hi all", "bob"));
        server_says(&mut t, datagram.clone());
        t.step();
        server_says(&mut t, datagram);
        t.step();

        // Both arrivals acked, one message surfaced.
        let acks = t
            .socket
            .sent
            .iter()
            .filter(|(_, d)| d[..2] == [LobbyMessageKind::Broadcast.tag(), 9])
            .count();
        assert_eq!(acks, 2);
        let taken = t.take_messages();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].text, "hi all");
        assert_eq!(taken[0].username, "bob");
    }

    #[test]
    fn chat_queue_is_fifo_with_one_in_flight() {
        let mut t = transport();
        connect(&mut t);
        let first = t.send_message("first");
        let second = t.send_message("second");
        t.step();

        let sends: Vec<&Vec<u8>> = t
            .socket
            .sent
            .iter()
            .filter(|(_, d)| d[0] == LobbyMessageKind::SendMessage.tag())
            .map(|(_, d)| d)
            .collect();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0][1], first);

        server_says(
            &mut t,
            Header::with_id(LobbyMessageKind::SendMessage, first).encode().to_vec(),
        );
        t.step();
        t.step();
        let last = t.socket.sent.last().unwrap().1.clone();
        assert_eq!(last[..2], [LobbyMessageKind::SendMessage.tag(), second]);
    }

    #[test]
    fn game_socket_announces_from_the_handed_socket() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        server_says(&mut t, Header::new(LobbyMessageKind::SharingGame).encode().to_vec());
        t.step();

        t.set_game_socket(ScriptedSocket::default());
        t.step();
        // The announcement left the handed-over socket, not the lobby one.
        assert!(!sent_kinds(&t).contains(&LobbyMessageKind::GameSocket.tag()));
        {
            let handoff = t.game_socket.as_ref().unwrap();
            assert_eq!(handoff.socket.sent.len(), 1);
            assert_eq!(handoff.socket.sent[0].1[0], LobbyMessageKind::GameSocket.tag());
        }
        assert!(!t.game_socket_delivered());

        server_says(&mut t, Header::new(LobbyMessageKind::GameSocket).encode().to_vec());
        t.step();
        assert!(t.game_socket_delivered());
    }

    #[test]
    fn unshare_discards_the_game_socket_handoff() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        server_says(&mut t, Header::new(LobbyMessageKind::SharingGame).encode().to_vec());
        t.step();
        t.set_game_socket(ScriptedSocket::default());

        t.unshare_game();
        assert!(t.game_socket.is_none());
        assert!(!t.game_socket_delivered());
    }

    #[test]
    fn undelivered_game_socket_surfaces_once() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        server_says(&mut t, Header::new(LobbyMessageKind::SharingGame).encode().to_vec());
        t.step();
        t.set_game_socket(ScriptedSocket::default());
        for _ in 0..(8 * LONG_NETWORK_TIMEOUT) {
            t.step();
        }
        let undelivered = t
            .conditions()
            .filter(|&c| c == LobbyCondition::GameSocketUndelivered)
            .count();
        assert_eq!(undelivered, 1);
    }

    #[test]
    fn close_lobby_resets_everything() {
        let mut t = transport();
        connect(&mut t);
        t.share_game("my game");
        server_says(&mut t, Header::new(LobbyMessageKind::CloseLobby).encode().to_vec());
        t.step();
        assert_eq!(t.connection_state(), ConnectionState::NotConnecting);
        assert_eq!(t.sharing_state(), SharingState::NotSharing);
        assert!(t.conditions().any(|c| c == LobbyCondition::LobbyClosed));
    }

    #[test]
    fn datagrams_from_strangers_are_ignored() {
        let mut t = transport();
        t.enable_connection("alice");
        t.socket
            .inbound
            .push_back((99, Header::new(LobbyMessageKind::Connecting).encode().to_vec()));
        t.step();
        assert_eq!(t.connection_state(), ConnectionState::Connecting);
    }

    #[test]
    fn malformed_datagrams_are_dropped_without_state_change() {
        let mut t = transport();
        t.enable_connection("alice");
        server_says(&mut t, vec![6, 0, 1, 1]); // reserved bytes set
        server_says(&mut t, vec![6]); // truncated header
        server_says(&mut t, vec![200, 0, 0, 0]); // unknown kind
        t.step();
        assert_eq!(t.connection_state(), ConnectionState::Connecting);
    }
}
