//! Binary codec for [`OrderBody`] payloads.
//!
//! One `match` in each direction replaces the per-subclass
//! `getData`/`setData` pairs of the historical implementation. The payload
//! layout is fixed and big-endian; the tag byte travels outside the payload,
//! supplied by the enclosing transport or replay framing.
//!
//! Orders carry no internal length prefix. Fixed-size variants are validated
//! against their exact length; batch variants imply their element count from
//! `bytes.len() / record_size`, which must divide evenly. Batch payloads
//! store one contiguous array per field (all UIDs first, then each value
//! array), so decoding reconstructs the parallel mapping by position.

use std::fmt;

use crate::order::{ChatScope, OrderBody, OrderKind, MAX_CHAT_LEN};
use crate::wire::{WireError, WireReader, WireWriter};

/// Why a received order payload was rejected.
///
/// A decode failure never crashes the receiving side; the transport logs the
/// error and discards the offending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDecodeError {
    /// The tag byte does not name any known variant.
    UnknownTag {
        /// The offending tag.
        tag: u8,
    },
    /// A fixed-size variant arrived with the wrong payload length.
    LengthMismatch {
        /// The variant being decoded.
        kind: OrderKind,
        /// The length the variant requires.
        expected: usize,
        /// The length actually received.
        actual: usize,
    },
    /// A batch variant's payload is not a whole number of records.
    IndivisibleLength {
        /// The variant being decoded.
        kind: OrderKind,
        /// Bytes per record for this variant.
        record_size: usize,
        /// The length actually received.
        actual: usize,
    },
    /// Bytes were left over after the payload was fully decoded.
    TrailingBytes {
        /// The variant being decoded.
        kind: OrderKind,
        /// How many bytes remained.
        trailing: usize,
    },
    /// A primitive read failed (short buffer, unterminated string).
    Wire(WireError),
}

impl fmt::Display for OrderDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTag { tag } => write!(f, "unknown order tag {tag}"),
            Self::LengthMismatch {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{kind:?} payload must be {expected} bytes, got {actual}"
            ),
            Self::IndivisibleLength {
                kind,
                record_size,
                actual,
            } => write!(
                f,
                "{kind:?} payload of {actual} bytes is not a multiple of {record_size}"
            ),
            Self::TrailingBytes { kind, trailing } => {
                write!(f, "{kind:?} payload has {trailing} trailing bytes")
            }
            Self::Wire(e) => write!(f, "order payload truncated: {e}"),
        }
    }
}

impl std::error::Error for OrderDecodeError {}

impl From<WireError> for OrderDecodeError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

/// Encoded chat text length: the text bytes (interior nul and anything past
/// the cap stripped) plus the terminator.
pub(crate) fn encoded_text_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let visible = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    visible.min(MAX_CHAT_LEN - 1) + 1
}

fn write_parallel(w: &mut WireWriter, arrays: &[&[i32]]) {
    // One contiguous array per field, not interleaved records.
    for array in arrays {
        debug_assert_eq!(array.len(), arrays[0].len());
        for &v in *array {
            w.write_i32(v);
        }
    }
}

fn read_array(r: &mut WireReader<'_>, count: usize) -> Result<Vec<i32>, WireError> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(r.read_i32()?);
    }
    Ok(values)
}

/// Serializes an order payload, returning its wire tag and bytes.
///
/// Always succeeds for a well-formed order; the byte length always equals
/// [`OrderBody::data_length`].
#[must_use]
pub fn encode(body: &OrderBody) -> (u8, Vec<u8>) {
    let mut w = WireWriter::with_capacity(body.data_length());
    match body {
        OrderBody::Create {
            team,
            pos_x,
            pos_y,
            building_type,
        } => {
            w.write_u32(*team);
            w.write_i32(*pos_x);
            w.write_i32(*pos_y);
            w.write_i32(*building_type);
        }
        OrderBody::Delete { uid }
        | OrderBody::CancelDelete { uid }
        | OrderBody::Construction { uid }
        | OrderBody::CancelConstruction { uid } => w.write_i32(*uid),
        OrderBody::ModifyUnits {
            uids,
            trig_hp,
            trig_hungry,
        } => write_parallel(&mut w, &[uids, trig_hp, trig_hungry]),
        OrderBody::ModifyBuildings {
            uids,
            number_requested,
        } => write_parallel(&mut w, &[uids, number_requested]),
        OrderBody::ModifySwarms { uids, ratios } => {
            debug_assert_eq!(uids.len(), ratios.len());
            for &uid in uids {
                w.write_i32(uid);
            }
            for ratio in ratios {
                for &slot in ratio {
                    w.write_i32(slot);
                }
            }
        }
        OrderBody::ModifyFlags { uids, ranges } => write_parallel(&mut w, &[uids, ranges]),
        OrderBody::MoveFlags { uids, xs, ys } => write_parallel(&mut w, &[uids, xs, ys]),
        OrderBody::Null | OrderBody::Quit => {}
        OrderBody::Message {
            recipients_mask,
            scope,
            text,
        } => {
            w.write_u32(*recipients_mask);
            w.write_u32(scope.to_wire());
            w.write_bounded_string(text, MAX_CHAT_LEN);
        }
        OrderBody::SetAlliance {
            team,
            alliance_mask,
            vision_mask,
        } => {
            w.write_u32(*team);
            w.write_u32(*alliance_mask);
            w.write_u32(*vision_mask);
        }
        OrderBody::SubmitChecksum { value } => w.write_i32(*value),
        OrderBody::MapMark { team, x, y } => {
            w.write_u32(*team);
            w.write_i32(*x);
            w.write_i32(*y);
        }
        OrderBody::WaitingForPlayer { away_mask } => w.write_u32(*away_mask),
        OrderBody::DroppingPlayer { dropping_mask } => w.write_u32(*dropping_mask),
        OrderBody::RequestingAway {
            player,
            missing_step,
            last_available_step,
        } => {
            w.write_i32(*player);
            w.write_i32(*missing_step);
            w.write_i32(*last_available_step);
        }
        OrderBody::NoMoreOrders {
            player,
            last_available_step,
        } => {
            w.write_i32(*player);
            w.write_i32(*last_available_step);
        }
        OrderBody::PlayerQuit { player } => w.write_i32(*player),
    }
    debug_assert_eq!(w.len(), body.data_length());
    (body.kind().tag(), w.into_vec())
}

fn expect_len(kind: OrderKind, expected: usize, data: &[u8]) -> Result<(), OrderDecodeError> {
    if data.len() != expected {
        return Err(OrderDecodeError::LengthMismatch {
            kind,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn batch_count(
    kind: OrderKind,
    record_size: usize,
    data: &[u8],
) -> Result<usize, OrderDecodeError> {
    if data.len() % record_size != 0 {
        return Err(OrderDecodeError::IndivisibleLength {
            kind,
            record_size,
            actual: data.len(),
        });
    }
    Ok(data.len() / record_size)
}

/// Reconstructs an order payload from its tag and bytes.
///
/// Fails on an unknown tag, on any length that does not match the variant's
/// length formula, and on malformed embedded strings. Zero-count batch
/// payloads are valid.
pub fn decode(tag: u8, data: &[u8]) -> Result<OrderBody, OrderDecodeError> {
    let kind = OrderKind::from_tag(tag).ok_or(OrderDecodeError::UnknownTag { tag })?;
    let mut r = WireReader::new(data);
    let body = match kind {
        OrderKind::Create => {
            expect_len(kind, 16, data)?;
            OrderBody::Create {
                team: r.read_u32()?,
                pos_x: r.read_i32()?,
                pos_y: r.read_i32()?,
                building_type: r.read_i32()?,
            }
        }
        OrderKind::Delete => {
            expect_len(kind, 4, data)?;
            OrderBody::Delete { uid: r.read_i32()? }
        }
        OrderKind::CancelDelete => {
            expect_len(kind, 4, data)?;
            OrderBody::CancelDelete { uid: r.read_i32()? }
        }
        OrderKind::Construction => {
            expect_len(kind, 4, data)?;
            OrderBody::Construction { uid: r.read_i32()? }
        }
        OrderKind::CancelConstruction => {
            expect_len(kind, 4, data)?;
            OrderBody::CancelConstruction { uid: r.read_i32()? }
        }
        OrderKind::ModifyUnits => {
            let count = batch_count(kind, 12, data)?;
            OrderBody::ModifyUnits {
                uids: read_array(&mut r, count)?,
                trig_hp: read_array(&mut r, count)?,
                trig_hungry: read_array(&mut r, count)?,
            }
        }
        OrderKind::ModifyBuildings => {
            let count = batch_count(kind, 8, data)?;
            OrderBody::ModifyBuildings {
                uids: read_array(&mut r, count)?,
                number_requested: read_array(&mut r, count)?,
            }
        }
        OrderKind::ModifySwarms => {
            let count = batch_count(kind, 16, data)?;
            let uids = read_array(&mut r, count)?;
            let mut ratios = Vec::with_capacity(count);
            for _ in 0..count {
                let mut ratio = [0i32; crate::order::UNIT_TYPE_COUNT];
                for slot in &mut ratio {
                    *slot = r.read_i32()?;
                }
                ratios.push(ratio);
            }
            OrderBody::ModifySwarms { uids, ratios }
        }
        OrderKind::ModifyFlags => {
            let count = batch_count(kind, 8, data)?;
            OrderBody::ModifyFlags {
                uids: read_array(&mut r, count)?,
                ranges: read_array(&mut r, count)?,
            }
        }
        OrderKind::MoveFlags => {
            let count = batch_count(kind, 12, data)?;
            OrderBody::MoveFlags {
                uids: read_array(&mut r, count)?,
                xs: read_array(&mut r, count)?,
                ys: read_array(&mut r, count)?,
            }
        }
        OrderKind::Null => {
            expect_len(kind, 0, data)?;
            OrderBody::Null
        }
        OrderKind::Quit => {
            expect_len(kind, 0, data)?;
            OrderBody::Quit
        }
        OrderKind::Message => OrderBody::Message {
            recipients_mask: r.read_u32()?,
            scope: ChatScope::from_wire(r.read_u32()?),
            text: r.read_bounded_string(MAX_CHAT_LEN)?,
        },
        OrderKind::SetAlliance => {
            expect_len(kind, 12, data)?;
            OrderBody::SetAlliance {
                team: r.read_u32()?,
                alliance_mask: r.read_u32()?,
                vision_mask: r.read_u32()?,
            }
        }
        OrderKind::SubmitChecksum => {
            expect_len(kind, 4, data)?;
            OrderBody::SubmitChecksum {
                value: r.read_i32()?,
            }
        }
        OrderKind::MapMark => {
            expect_len(kind, 12, data)?;
            OrderBody::MapMark {
                team: r.read_u32()?,
                x: r.read_i32()?,
                y: r.read_i32()?,
            }
        }
        OrderKind::WaitingForPlayer => {
            expect_len(kind, 4, data)?;
            OrderBody::WaitingForPlayer {
                away_mask: r.read_u32()?,
            }
        }
        OrderKind::DroppingPlayer => {
            expect_len(kind, 4, data)?;
            OrderBody::DroppingPlayer {
                dropping_mask: r.read_u32()?,
            }
        }
        OrderKind::RequestingAway => {
            expect_len(kind, 12, data)?;
            OrderBody::RequestingAway {
                player: r.read_i32()?,
                missing_step: r.read_i32()?,
                last_available_step: r.read_i32()?,
            }
        }
        OrderKind::NoMoreOrders => {
            expect_len(kind, 8, data)?;
            OrderBody::NoMoreOrders {
                player: r.read_i32()?,
                last_available_step: r.read_i32()?,
            }
        }
        OrderKind::PlayerQuit => {
            expect_len(kind, 4, data)?;
            OrderBody::PlayerQuit {
                player: r.read_i32()?,
            }
        }
    };
    if !r.is_empty() {
        return Err(OrderDecodeError::TrailingBytes {
            kind,
            trailing: r.remaining(),
        });
    }
    Ok(body)
}
