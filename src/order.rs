//! The closed set of replicated game commands ("orders").
//!
//! Every player action that affects the simulation is reduced to an
//! [`Order`], serialized by [`codec`], transmitted to every peer of a
//! lockstep session and applied deterministically by each of them. The same
//! encoding is reused for replay/save streams (see [`crate::replay`]).
//!
//! The historical implementation modelled this as a deep virtual-dispatch
//! class hierarchy; here it is a single tagged sum type, [`OrderBody`], with
//! the tag enum [`OrderKind`] and one `match` in the codec.

pub mod codec;

/// Unique identifier of a game object (building, unit, flag), stable across
/// network and save boundaries.
pub type Uid = i32;

/// Number of producible unit types; swarm ratio records carry one slot per
/// type. The 16-byte swarm record size depends on this being 3.
pub const UNIT_TYPE_COUNT: usize = 3;

/// Maximum encoded chat text size in bytes, terminator included.
pub const MAX_CHAT_LEN: usize = 256;

/// Tag byte identifying each order variant on the wire.
///
/// The discriminant values are wire constants shared with every peer; they
/// must never be renumbered. Creation orders live below 40, batch
/// modification orders in the 40s, miscellaneous orders in the 50s and
/// network bookkeeping orders in the 60s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum OrderKind {
    /// Place a new building.
    Create = 1,
    /// Delete a building.
    Delete = 2,
    /// Cancel a pending deletion.
    CancelDelete = 3,
    /// Upgrade/repair a building.
    Construction = 4,
    /// Cancel a pending upgrade.
    CancelConstruction = 5,

    /// Batch unit trigger-threshold change.
    ModifyUnits = 41,
    /// Batch building worker-request change.
    ModifyBuildings = 42,
    /// Batch swarm production-ratio change.
    ModifySwarms = 43,
    /// Batch flag range change.
    ModifyFlags = 44,
    /// Batch flag reposition.
    MoveFlags = 45,

    /// No-op keepalive.
    Null = 51,
    /// The local player left the session.
    Quit = 52,
    /// In-game chat text.
    Message = 53,
    /// Alliance/vision mask change.
    SetAlliance = 54,
    /// Per-step state checksum submission for desync detection.
    SubmitChecksum = 55,
    /// Map ping visible to the player's team.
    MapMark = 56,

    /// The session is stalled waiting on the masked players.
    WaitingForPlayer = 61,
    /// The masked players are being dropped from the session.
    DroppingPlayer = 62,
    /// A peer requests retransmission of steps it missed.
    RequestingAway = 63,
    /// A peer announces it has no further orders buffered.
    NoMoreOrders = 64,
    /// A peer definitively quit the game.
    PlayerQuit = 65,
}

impl OrderKind {
    /// Maps a wire tag back to its variant. Unknown tags come from
    /// incompatible peers and are rejected by the codec.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Create,
            2 => Self::Delete,
            3 => Self::CancelDelete,
            4 => Self::Construction,
            5 => Self::CancelConstruction,
            41 => Self::ModifyUnits,
            42 => Self::ModifyBuildings,
            43 => Self::ModifySwarms,
            44 => Self::ModifyFlags,
            45 => Self::MoveFlags,
            51 => Self::Null,
            52 => Self::Quit,
            53 => Self::Message,
            54 => Self::SetAlliance,
            55 => Self::SubmitChecksum,
            56 => Self::MapMark,
            61 => Self::WaitingForPlayer,
            62 => Self::DroppingPlayer,
            63 => Self::RequestingAway,
            64 => Self::NoMoreOrders,
            65 => Self::PlayerQuit,
            _ => return None,
        })
    }

    /// The wire tag value.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Routing class of a chat [`OrderBody::Message`].
///
/// Encoded as a `u32` on the wire; unknown values decode to [`Bad`] rather
/// than failing, since old clients simply ignored message classes they did
/// not know.
///
/// [`Bad`]: ChatScope::Bad
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChatScope {
    /// Unknown/invalid class.
    Bad,
    /// Visible to every recipient in the mask.
    Normal,
    /// Whispered to a single recipient.
    Private,
}

impl ChatScope {
    pub(crate) fn from_wire(v: u32) -> Self {
        match v {
            1 => Self::Normal,
            2 => Self::Private,
            _ => Self::Bad,
        }
    }

    pub(crate) fn to_wire(self) -> u32 {
        match self {
            Self::Bad => 0,
            Self::Normal => 1,
            Self::Private => 2,
        }
    }
}

/// Payload of a single replicated command.
///
/// Batch variants carry one `Vec` per field; the vectors are parallel
/// (element `i` of each belongs to the object `uids[i]`) and must share one
/// length. Use the checked constructors ([`OrderBody::modify_units`] and
/// friends) to uphold that; the codec preserves it in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBody {
    /// Place a building of `building_type` for `team` at a map position.
    Create {
        /// Owning team number.
        team: u32,
        /// Map x coordinate.
        pos_x: i32,
        /// Map y coordinate.
        pos_y: i32,
        /// Building type enum value, as the simulation numbers them.
        building_type: i32,
    },
    /// Delete the building `uid`.
    Delete {
        /// Target building.
        uid: Uid,
    },
    /// Cancel a pending deletion of `uid`.
    CancelDelete {
        /// Target building.
        uid: Uid,
    },
    /// Start upgrading the building `uid`.
    Construction {
        /// Target building.
        uid: Uid,
    },
    /// Cancel the upgrade of `uid`.
    CancelConstruction {
        /// Target building.
        uid: Uid,
    },

    /// Change retreat triggers on a set of units.
    ModifyUnits {
        /// Target units.
        uids: Vec<Uid>,
        /// Hit-point retreat thresholds, parallel to `uids`.
        trig_hp: Vec<i32>,
        /// Hunger retreat thresholds, parallel to `uids`.
        trig_hungry: Vec<i32>,
    },
    /// Change the requested worker count on a set of buildings.
    ModifyBuildings {
        /// Target buildings.
        uids: Vec<Uid>,
        /// Requested worker counts, parallel to `uids`.
        number_requested: Vec<i32>,
    },
    /// Change production ratios on a set of swarms.
    ModifySwarms {
        /// Target swarms.
        uids: Vec<Uid>,
        /// One ratio slot per unit type, parallel to `uids`.
        ratios: Vec<[i32; UNIT_TYPE_COUNT]>,
    },
    /// Change the action range of a set of flags.
    ModifyFlags {
        /// Target flags.
        uids: Vec<Uid>,
        /// New ranges, parallel to `uids`.
        ranges: Vec<i32>,
    },
    /// Move a set of flags.
    MoveFlags {
        /// Target flags.
        uids: Vec<Uid>,
        /// New x coordinates, parallel to `uids`.
        xs: Vec<i32>,
        /// New y coordinates, parallel to `uids`.
        ys: Vec<i32>,
    },

    /// No-op keepalive; carries nothing.
    Null,
    /// The sender left the session.
    Quit,
    /// Chat text routed by recipient bitmask.
    Message {
        /// One bit per recipient player.
        recipients_mask: u32,
        /// Routing class.
        scope: ChatScope,
        /// The text; encoded nul-terminated, truncated to
        /// [`MAX_CHAT_LEN`] - 1 bytes.
        text: String,
    },
    /// Change a team's alliance and shared-vision masks.
    SetAlliance {
        /// Team whose masks change.
        team: u32,
        /// One bit per allied team.
        alliance_mask: u32,
        /// One bit per team granted vision.
        vision_mask: u32,
    },
    /// Per-step simulation checksum, compared across peers.
    SubmitChecksum {
        /// The locally computed checksum value.
        value: i32,
    },
    /// Map ping at a position, shown to the sender's team.
    MapMark {
        /// Pinging team.
        team: u32,
        /// Map x coordinate.
        x: i32,
        /// Map y coordinate.
        y: i32,
    },

    /// The session is stalled on the masked players.
    WaitingForPlayer {
        /// One bit per player the session is waiting on.
        away_mask: u32,
    },
    /// The masked players are being dropped.
    DroppingPlayer {
        /// One bit per player being dropped.
        dropping_mask: u32,
    },
    /// Request retransmission of steps `missing_step..=last_available_step`
    /// for `player`.
    RequestingAway {
        /// Player whose orders are missing.
        player: i32,
        /// First missing step.
        missing_step: i32,
        /// Last step the requester knows to exist.
        last_available_step: i32,
    },
    /// `player` has no orders buffered beyond `last_available_step`.
    NoMoreOrders {
        /// The announcing player.
        player: i32,
        /// Last step it can provide.
        last_available_step: i32,
    },
    /// `player` definitively quit the game.
    PlayerQuit {
        /// The quitting player.
        player: i32,
    },
}

/// Error returned by the checked batch constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MismatchedBatch {
    /// Length of the `uids` vector.
    pub uids: usize,
    /// Length of the first value vector that disagreed.
    pub values: usize,
}

impl std::fmt::Display for MismatchedBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch field length {} does not match {} uids",
            self.values, self.uids
        )
    }
}

impl std::error::Error for MismatchedBatch {}

fn check_parallel(uids: usize, values: &[usize]) -> Result<(), MismatchedBatch> {
    for &v in values {
        if v != uids {
            return Err(MismatchedBatch { uids, values: v });
        }
    }
    Ok(())
}

impl OrderBody {
    /// Builds a [`ModifyUnits`](Self::ModifyUnits) order, checking that the
    /// parallel vectors agree in length.
    pub fn modify_units(
        uids: Vec<Uid>,
        trig_hp: Vec<i32>,
        trig_hungry: Vec<i32>,
    ) -> Result<Self, MismatchedBatch> {
        check_parallel(uids.len(), &[trig_hp.len(), trig_hungry.len()])?;
        Ok(Self::ModifyUnits {
            uids,
            trig_hp,
            trig_hungry,
        })
    }

    /// Builds a [`ModifyBuildings`](Self::ModifyBuildings) order.
    pub fn modify_buildings(
        uids: Vec<Uid>,
        number_requested: Vec<i32>,
    ) -> Result<Self, MismatchedBatch> {
        check_parallel(uids.len(), &[number_requested.len()])?;
        Ok(Self::ModifyBuildings {
            uids,
            number_requested,
        })
    }

    /// Builds a [`ModifySwarms`](Self::ModifySwarms) order.
    pub fn modify_swarms(
        uids: Vec<Uid>,
        ratios: Vec<[i32; UNIT_TYPE_COUNT]>,
    ) -> Result<Self, MismatchedBatch> {
        check_parallel(uids.len(), &[ratios.len()])?;
        Ok(Self::ModifySwarms { uids, ratios })
    }

    /// Builds a [`ModifyFlags`](Self::ModifyFlags) order.
    pub fn modify_flags(uids: Vec<Uid>, ranges: Vec<i32>) -> Result<Self, MismatchedBatch> {
        check_parallel(uids.len(), &[ranges.len()])?;
        Ok(Self::ModifyFlags { uids, ranges })
    }

    /// Builds a [`MoveFlags`](Self::MoveFlags) order.
    pub fn move_flags(
        uids: Vec<Uid>,
        xs: Vec<i32>,
        ys: Vec<i32>,
    ) -> Result<Self, MismatchedBatch> {
        check_parallel(uids.len(), &[xs.len(), ys.len()])?;
        Ok(Self::MoveFlags { uids, xs, ys })
    }

    /// The wire tag of this variant.
    #[must_use]
    pub fn kind(&self) -> OrderKind {
        match self {
            Self::Create { .. } => OrderKind::Create,
            Self::Delete { .. } => OrderKind::Delete,
            Self::CancelDelete { .. } => OrderKind::CancelDelete,
            Self::Construction { .. } => OrderKind::Construction,
            Self::CancelConstruction { .. } => OrderKind::CancelConstruction,
            Self::ModifyUnits { .. } => OrderKind::ModifyUnits,
            Self::ModifyBuildings { .. } => OrderKind::ModifyBuildings,
            Self::ModifySwarms { .. } => OrderKind::ModifySwarms,
            Self::ModifyFlags { .. } => OrderKind::ModifyFlags,
            Self::MoveFlags { .. } => OrderKind::MoveFlags,
            Self::Null => OrderKind::Null,
            Self::Quit => OrderKind::Quit,
            Self::Message { .. } => OrderKind::Message,
            Self::SetAlliance { .. } => OrderKind::SetAlliance,
            Self::SubmitChecksum { .. } => OrderKind::SubmitChecksum,
            Self::MapMark { .. } => OrderKind::MapMark,
            Self::WaitingForPlayer { .. } => OrderKind::WaitingForPlayer,
            Self::DroppingPlayer { .. } => OrderKind::DroppingPlayer,
            Self::RequestingAway { .. } => OrderKind::RequestingAway,
            Self::NoMoreOrders { .. } => OrderKind::NoMoreOrders,
            Self::PlayerQuit { .. } => OrderKind::PlayerQuit,
        }
    }

    /// Exact encoded payload length in bytes.
    ///
    /// This always equals the length produced by [`codec::encode`] and
    /// required by [`codec::decode`]. Batch variants are a linear function
    /// of element count; the chat message length is implied by its embedded
    /// terminator.
    #[must_use]
    pub fn data_length(&self) -> usize {
        match self {
            Self::Create { .. } => 16,
            Self::Delete { .. }
            | Self::CancelDelete { .. }
            | Self::Construction { .. }
            | Self::CancelConstruction { .. } => 4,
            Self::ModifyUnits { uids, .. } => uids.len() * 12,
            Self::ModifyBuildings { uids, .. } => uids.len() * 8,
            // 4-byte uid + 3 unit types x 4-byte ratio.
            Self::ModifySwarms { uids, .. } => uids.len() * 16,
            Self::ModifyFlags { uids, .. } => uids.len() * 8,
            Self::MoveFlags { uids, .. } => uids.len() * 12,
            Self::Null | Self::Quit => 0,
            Self::Message { text, .. } => 8 + codec::encoded_text_len(text),
            Self::SetAlliance { .. } => 12,
            Self::SubmitChecksum { .. } => 4,
            Self::MapMark { .. } => 12,
            Self::WaitingForPlayer { .. } | Self::DroppingPlayer { .. } => 4,
            Self::RequestingAway { .. } => 12,
            Self::NoMoreOrders { .. } => 8,
            Self::PlayerQuit { .. } => 4,
        }
    }

    /// Contribution of this order to the session-wide rolling checksum.
    ///
    /// This is the tag value, a compile-time constant per variant: the
    /// desync check is a coarse message-type tally over the order stream,
    /// NOT a content hash. Peers compare the running sums, so this weak
    /// semantic must be preserved exactly; strengthening it unilaterally
    /// would desync against existing clients.
    #[must_use]
    pub fn checksum_contribution(&self) -> i32 {
        i32::from(self.kind().tag())
    }
}

/// A replicated command together with the player that issued it.
///
/// Orders are immutable once constructed and consumed exactly once by the
/// simulation or replay step. `sender` is assigned by the session layer on
/// receipt; it is never carried in the live network payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Issuing player number; -1 for locally issued orders that have not
    /// passed through the session layer.
    pub sender: i32,
    /// The command payload.
    pub body: OrderBody,
}

impl Order {
    /// Wraps a locally issued order (no sender assigned yet).
    #[must_use]
    pub fn local(body: OrderBody) -> Self {
        Self { sender: -1, body }
    }

    /// Wraps an order received from `sender`.
    #[must_use]
    pub fn received(sender: i32, body: OrderBody) -> Self {
        Self { sender, body }
    }
}
