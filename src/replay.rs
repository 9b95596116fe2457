//! Persisted order streams for saves and replays.
//!
//! A replay is the full order stream of a session written to disk; feeding
//! it back through the simulation reproduces the game deterministically.
//! Each order is wrapped in a 4-byte begin/end section signature around the
//! type tag, the sender and an explicit payload length. The signatures make
//! corruption and framing bugs loud when a stream is read back; the live
//! network framing (see [`crate::network::messages`]) does not use them.

use std::fmt;

use crate::order::{codec, Order, OrderBody};
use crate::wire::{WireError, WireReader, WireWriter};

/// Begin-of-order section signature.
pub const ORDER_BEGIN: [u8; 4] = *b"ORDb";
/// End-of-order section signature.
pub const ORDER_END: [u8; 4] = *b"ORDe";

/// Why a replay stream could not be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayError {
    /// A section signature was missing or wrong.
    BadSignature {
        /// The four bytes actually found.
        found: [u8; 4],
        /// The signature that was expected.
        expected: [u8; 4],
    },
    /// The framed payload failed to decode.
    Codec(codec::OrderDecodeError),
    /// The stream ended mid-frame.
    Wire(WireError),
    /// The payload does not fit the frame's `u16` length field.
    PayloadTooLarge {
        /// The encoded payload length.
        len: usize,
    },
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature { found, expected } => write!(
                f,
                "bad section signature {:?}, expected {:?}",
                String::from_utf8_lossy(found),
                String::from_utf8_lossy(expected)
            ),
            Self::Codec(e) => write!(f, "framed order failed to decode: {e}"),
            Self::Wire(e) => write!(f, "replay stream truncated: {e}"),
            Self::PayloadTooLarge { len } => {
                write!(f, "order payload of {len} bytes exceeds the frame length field")
            }
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<codec::OrderDecodeError> for ReplayError {
    fn from(e: codec::OrderDecodeError) -> Self {
        Self::Codec(e)
    }
}

impl From<WireError> for ReplayError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

/// Appends one framed order to a stream.
///
/// Layout: `"ORDb"`, tag byte, sender (`i32`), payload length (`u16`),
/// payload, `"ORDe"`.
///
/// Batch orders have no entry-count cap, so an encoded payload can outgrow
/// the frame's length field; such an order is rejected before anything is
/// written, leaving the stream untouched.
pub fn write_order(w: &mut WireWriter, order: &Order) -> Result<(), ReplayError> {
    let (tag, payload) = codec::encode(&order.body);
    let len = u16::try_from(payload.len()).map_err(|_| ReplayError::PayloadTooLarge {
        len: payload.len(),
    })?;
    w.write_bytes(&ORDER_BEGIN);
    w.write_u8(tag);
    w.write_i32(order.sender);
    w.write_u16(len);
    w.write_bytes(&payload);
    w.write_bytes(&ORDER_END);
    Ok(())
}

fn expect_signature(r: &mut WireReader<'_>, expected: [u8; 4]) -> Result<(), ReplayError> {
    let bytes = r.read_bytes(4)?;
    let found = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if found != expected {
        return Err(ReplayError::BadSignature { found, expected });
    }
    Ok(())
}

/// Reads one framed order back, validating both signatures and the declared
/// payload length.
pub fn read_order(r: &mut WireReader<'_>) -> Result<Order, ReplayError> {
    expect_signature(r, ORDER_BEGIN)?;
    let tag = r.read_u8()?;
    let sender = r.read_i32()?;
    let len = usize::from(r.read_u16()?);
    let payload = r.read_bytes(len)?;
    let body = codec::decode(tag, payload)?;
    expect_signature(r, ORDER_END)?;
    Ok(Order { sender, body })
}

/// Convenience: frames a whole order stream into one buffer.
pub fn write_stream(orders: &[Order]) -> Result<Vec<u8>, ReplayError> {
    let mut w = WireWriter::new();
    for order in orders {
        write_order(&mut w, order)?;
    }
    Ok(w.into_vec())
}

/// Convenience: reads orders until the buffer is exhausted.
pub fn read_stream(buf: &[u8]) -> Result<Vec<Order>, ReplayError> {
    let mut r = WireReader::new(buf);
    let mut orders = Vec::new();
    while !r.is_empty() {
        orders.push(read_order(&mut r)?);
    }
    Ok(orders)
}

/// Returns true if `body` belongs in a replay stream.
///
/// Network bookkeeping orders describe transient transport conditions, not
/// simulation input; replaying them would be meaningless.
#[must_use]
pub fn is_replayable(body: &OrderBody) -> bool {
    !matches!(
        body,
        OrderBody::WaitingForPlayer { .. }
            | OrderBody::DroppingPlayer { .. }
            | OrderBody::RequestingAway { .. }
            | OrderBody::NoMoreOrders { .. }
    )
}
