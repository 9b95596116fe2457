//! Wire format of the lobby protocol.
//!
//! Every lobby datagram opens with a 4-byte header:
//!
//! ```text
//! +------+------+----------+----------+
//! | kind |  id  | reserved | reserved |
//! +------+------+----------+----------+
//! ```
//!
//! followed by a kind-specific payload. All multi-byte integers are
//! big-endian. The `id` byte carries a message id for the chat reliability
//! queue or a batch count for list acknowledgments; it is zero otherwise.
//! Non-zero reserved bytes mark a malformed datagram, which the transport
//! logs and drops without any state change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::wire::{WireError, WireReader, WireWriter};

/// Length of the fixed datagram header.
pub const HEADER_LEN: usize = 4;

/// Maximum encoded username size, terminator included.
pub const USERNAME_MAX: usize = 32;

/// Maximum encoded game name size, terminator included.
pub const GAME_NAME_MAX: usize = 128;

/// Maximum encoded chat text size in a lobby datagram, terminator included.
pub const CHAT_TEXT_MAX: usize = 256;

/// Largest possible encoded game-list entry.
pub const GAME_ENTRY_MAX: usize = 4 + 2 + 4 + USERNAME_MAX + GAME_NAME_MAX;
/// Smallest possible encoded game-list entry (both strings empty).
pub const GAME_ENTRY_MIN: usize = 4 + 2 + 4 + 1 + 1;

/// Largest possible encoded client-list entry.
pub const CLIENT_ENTRY_MAX: usize = 4 + USERNAME_MAX;
/// Smallest possible encoded client-list entry.
pub const CLIENT_ENTRY_MIN: usize = 4 + 1;

/// Kind byte of a lobby datagram.
///
/// The values are wire constants shared with the lobby server; never
/// renumber them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LobbyMessageKind {
    /// Explicitly invalid; logged and dropped.
    Bad = 0,
    /// Chat text broadcast to the lobby; also the ack for inbound chat.
    Broadcast = 1,
    /// Chat text whispered to one client.
    Private = 2,
    /// Administrative text from the server.
    Admin = 3,
    /// Delivery receipt for a private message.
    PrivateReceipt = 4,
    /// Client-to-server chat submission; echoed back as the ack.
    SendMessage = 5,
    /// Connection request (client) / connection accepted (server).
    Connecting = 6,
    /// The server refused the connection.
    ConnectionRefused = 7,
    /// Disconnection request (client) / disconnection confirmed (server).
    Deconnecting = 8,
    /// Game-sharing request (client) / sharing confirmed (server).
    SharingGame = 9,
    /// Stop-sharing request (client) / unsharing confirmed (server).
    StopSharingGame = 10,
    /// Additive batch of shared games.
    GamesList = 11,
    /// Removal batch of unshared game uids.
    UnsharedList = 12,
    /// Presence heartbeat, both directions.
    ConnectionPresence = 13,
    /// Game-socket handoff (client) / handoff confirmed (server).
    GameSocket = 14,
    /// Additive batch of lobby clients.
    ClientsList = 15,
    /// Removal batch of departed client uids.
    LeftClientsList = 16,
    /// The server is shutting the lobby down.
    CloseLobby = 17,
}

impl LobbyMessageKind {
    /// Maps a wire kind byte back to its variant.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Bad,
            1 => Self::Broadcast,
            2 => Self::Private,
            3 => Self::Admin,
            4 => Self::PrivateReceipt,
            5 => Self::SendMessage,
            6 => Self::Connecting,
            7 => Self::ConnectionRefused,
            8 => Self::Deconnecting,
            9 => Self::SharingGame,
            10 => Self::StopSharingGame,
            11 => Self::GamesList,
            12 => Self::UnsharedList,
            13 => Self::ConnectionPresence,
            14 => Self::GameSocket,
            15 => Self::ClientsList,
            16 => Self::LeftClientsList,
            17 => Self::CloseLobby,
            _ => return None,
        })
    }

    /// The wire kind byte.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// True for the inbound chat kinds that feed the received-message
    /// dedupe path.
    #[must_use]
    pub fn is_chat(self) -> bool {
        matches!(
            self,
            Self::Broadcast | Self::Private | Self::Admin | Self::PrivateReceipt
        )
    }
}

/// The fixed 4-byte datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// What the datagram is.
    pub kind: LobbyMessageKind,
    /// Message id or batch count, depending on `kind`; zero otherwise.
    pub id: u8,
}

impl Header {
    /// Builds a header with a zero id.
    #[must_use]
    pub fn new(kind: LobbyMessageKind) -> Self {
        Self { kind, id: 0 }
    }

    /// Builds a header carrying an id/count byte.
    #[must_use]
    pub fn with_id(kind: LobbyMessageKind, id: u8) -> Self {
        Self { kind, id }
    }

    /// Encodes the header bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        [self.kind.tag(), self.id, 0, 0]
    }

    /// Splits a datagram into header and payload.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), MalformedDatagram> {
        if datagram.len() < HEADER_LEN {
            return Err(MalformedDatagram::TooShort {
                len: datagram.len(),
            });
        }
        if datagram[2] != 0 || datagram[3] != 0 {
            return Err(MalformedDatagram::ReservedBytes {
                found: [datagram[2], datagram[3]],
            });
        }
        let kind = LobbyMessageKind::from_tag(datagram[0])
            .ok_or(MalformedDatagram::UnknownKind { tag: datagram[0] })?;
        Ok((
            Self {
                kind,
                id: datagram[1],
            },
            &datagram[HEADER_LEN..],
        ))
    }
}

/// Why a received datagram was dropped before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedDatagram {
    /// Shorter than the fixed header.
    TooShort {
        /// The datagram length.
        len: usize,
    },
    /// The reserved header bytes were not zero.
    ReservedBytes {
        /// The two reserved bytes actually found.
        found: [u8; 2],
    },
    /// The kind byte names no known message.
    UnknownKind {
        /// The offending kind byte.
        tag: u8,
    },
    /// A list payload disagreed with its declared count.
    BadListPayload {
        /// The count the payload declared.
        declared: usize,
        /// The payload length received.
        payload_len: usize,
    },
}

impl fmt::Display for MalformedDatagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "datagram of {len} bytes has no header"),
            Self::ReservedBytes { found } => {
                write!(f, "reserved header bytes not zero: {found:?}")
            }
            Self::UnknownKind { tag } => write!(f, "unknown message kind {tag}"),
            Self::BadListPayload {
                declared,
                payload_len,
            } => write!(
                f,
                "list payload of {payload_len} bytes inconsistent with declared count {declared}"
            ),
        }
    }
}

impl std::error::Error for MalformedDatagram {}

fn bad_list(declared: usize, payload_len: usize) -> impl Fn(WireError) -> MalformedDatagram {
    // A checked read past the end always means the payload is shorter than
    // its declared count requires.
    move |_| MalformedDatagram::BadListPayload {
        declared,
        payload_len,
    }
}

/// One shared game as advertised by the lobby server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    /// Host address, as the server saw it.
    pub host_ip: Ipv4Addr,
    /// Host UDP port.
    pub host_port: u16,
    /// Server-assigned unique id of the shared game.
    pub uid: u32,
    /// Hosting player's name, at most [`USERNAME_MAX`] - 1 bytes.
    pub username: String,
    /// The game's name, at most [`GAME_NAME_MAX`] - 1 bytes.
    pub name: String,
}

/// One client present in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Server-assigned unique id of the client.
    pub uid: u32,
    /// The client's name, at most [`USERNAME_MAX`] - 1 bytes.
    pub username: String,
}

fn read_game_entry(r: &mut WireReader<'_>) -> Result<GameInfo, WireError> {
    Ok(GameInfo {
        host_ip: Ipv4Addr::from(r.read_u32()?),
        host_port: r.read_u16()?,
        uid: r.read_u32()?,
        username: r.read_bounded_string(USERNAME_MAX)?,
        name: r.read_bounded_string(GAME_NAME_MAX)?,
    })
}

fn write_game_entry(w: &mut WireWriter, game: &GameInfo) {
    w.write_u32(u32::from(game.host_ip));
    w.write_u16(game.host_port);
    w.write_u32(game.uid);
    w.write_bounded_string(&game.username, USERNAME_MAX);
    w.write_bounded_string(&game.name, GAME_NAME_MAX);
}

fn read_client_entry(r: &mut WireReader<'_>) -> Result<ClientInfo, WireError> {
    Ok(ClientInfo {
        uid: r.read_u32()?,
        username: r.read_bounded_string(USERNAME_MAX)?,
    })
}

fn write_client_entry(w: &mut WireWriter, client: &ClientInfo) {
    w.write_u32(client.uid);
    w.write_bounded_string(&client.username, USERNAME_MAX);
}

fn check_count_bounds(
    declared: usize,
    payload_len: usize,
    entry_min: usize,
    entry_max: usize,
) -> Result<(), MalformedDatagram> {
    let err = MalformedDatagram::BadListPayload {
        declared,
        payload_len,
    };
    // Entries are variable-length but bounded both ways, so the payload
    // after the count must fall inside [count*min, count*max].
    let after_count = payload_len.saturating_sub(4);
    let lower = declared.checked_mul(entry_min).ok_or(err)?;
    let upper = declared.checked_mul(entry_max).ok_or(err)?;
    if after_count < lower || after_count > upper {
        return Err(err);
    }
    Ok(())
}

/// Decodes an additive games-list payload (`count` then `count` entries).
///
/// The whole payload is validated before anything is returned: a declared
/// count inconsistent with the buffer, a truncated entry, or trailing bytes
/// all reject the batch as malformed.
pub fn decode_games_list(payload: &[u8]) -> Result<Vec<GameInfo>, MalformedDatagram> {
    let mut r = WireReader::new(payload);
    let declared = r.read_u32().map_err(bad_list(0, payload.len()))? as usize;
    check_count_bounds(declared, payload.len(), GAME_ENTRY_MIN, GAME_ENTRY_MAX)?;
    let mut games = Vec::with_capacity(declared);
    for _ in 0..declared {
        games.push(read_game_entry(&mut r).map_err(bad_list(declared, payload.len()))?);
    }
    if !r.is_empty() {
        return Err(MalformedDatagram::BadListPayload {
            declared,
            payload_len: payload.len(),
        });
    }
    Ok(games)
}

/// Encodes an additive games-list payload. Used by servers and tests.
#[must_use]
pub fn encode_games_list(games: &[GameInfo]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.write_u32(games.len() as u32);
    for game in games {
        write_game_entry(&mut w, game);
    }
    w.into_vec()
}

/// Decodes an additive clients-list payload.
pub fn decode_clients_list(payload: &[u8]) -> Result<Vec<ClientInfo>, MalformedDatagram> {
    let mut r = WireReader::new(payload);
    let declared = r.read_u32().map_err(bad_list(0, payload.len()))? as usize;
    check_count_bounds(declared, payload.len(), CLIENT_ENTRY_MIN, CLIENT_ENTRY_MAX)?;
    let mut clients = Vec::with_capacity(declared);
    for _ in 0..declared {
        clients.push(read_client_entry(&mut r).map_err(bad_list(declared, payload.len()))?);
    }
    if !r.is_empty() {
        return Err(MalformedDatagram::BadListPayload {
            declared,
            payload_len: payload.len(),
        });
    }
    Ok(clients)
}

/// Encodes an additive clients-list payload. Used by servers and tests.
#[must_use]
pub fn encode_clients_list(clients: &[ClientInfo]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.write_u32(clients.len() as u32);
    for client in clients {
        write_client_entry(&mut w, client);
    }
    w.into_vec()
}

/// Decodes a removal payload: `count` then exactly `count` uids.
pub fn decode_uid_list(payload: &[u8]) -> Result<Vec<u32>, MalformedDatagram> {
    let mut r = WireReader::new(payload);
    let declared = r.read_u32().map_err(bad_list(0, payload.len()))? as usize;
    if payload.len() != 4 + declared * 4 {
        return Err(MalformedDatagram::BadListPayload {
            declared,
            payload_len: payload.len(),
        });
    }
    let mut uids = Vec::with_capacity(declared);
    for _ in 0..declared {
        uids.push(r.read_u32().map_err(bad_list(declared, payload.len()))?);
    }
    Ok(uids)
}

/// Encodes a removal payload. Used by servers and tests.
#[must_use]
pub fn encode_uid_list(uids: &[u32]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.write_u32(uids.len() as u32);
    for &uid in uids {
        w.write_u32(uid);
    }
    w.into_vec()
}

/// Decodes a left-clients payload: `count`, an echo packet id, then `count`
/// uids. The packet id is echoed back in the acknowledgment so the server
/// can match it to its own retry bookkeeping.
pub fn decode_left_clients(payload: &[u8]) -> Result<(u32, Vec<u32>), MalformedDatagram> {
    let mut r = WireReader::new(payload);
    let declared = r.read_u32().map_err(bad_list(0, payload.len()))? as usize;
    let packet_id = r.read_u32().map_err(bad_list(declared, payload.len()))?;
    if payload.len() != 8 + declared * 4 {
        return Err(MalformedDatagram::BadListPayload {
            declared,
            payload_len: payload.len(),
        });
    }
    let mut uids = Vec::with_capacity(declared);
    for _ in 0..declared {
        uids.push(r.read_u32().map_err(bad_list(declared, payload.len()))?);
    }
    Ok((packet_id, uids))
}

/// Encodes a left-clients payload. Used by servers and tests.
#[must_use]
pub fn encode_left_clients(packet_id: u32, uids: &[u32]) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.write_u32(uids.len() as u32);
    w.write_u32(packet_id);
    for &uid in uids {
        w.write_u32(uid);
    }
    w.into_vec()
}

/// Decodes an inbound chat payload: `text` (<= [`CHAT_TEXT_MAX`]) followed
/// by the sender's `username` (<= [`USERNAME_MAX`]).
pub fn decode_chat(payload: &[u8]) -> Result<(String, String), MalformedDatagram> {
    let mut r = WireReader::new(payload);
    let text = r
        .read_bounded_string(CHAT_TEXT_MAX)
        .map_err(bad_list(0, payload.len()))?;
    let username = r
        .read_bounded_string(USERNAME_MAX)
        .map_err(bad_list(0, payload.len()))?;
    Ok((text, username))
}

/// Encodes an inbound-style chat payload. Used by servers and tests.
#[must_use]
pub fn encode_chat(text: &str, username: &str) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.write_bounded_string(text, CHAT_TEXT_MAX);
    w.write_bounded_string(username, USERNAME_MAX);
    w.into_vec()
}
