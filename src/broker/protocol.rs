//! Broker wire protocol
//!
//! Fixed-size messages of native-endian 32-bit fields, each starting
//! with a type tag. Decoding happens once at the socket boundary; the
//! rest of the daemon only sees [`ClientMessage`] and [`ServerMessage`].

use thiserror::Error;

use super::regions::Rect;
use crate::constants::{
    MSG_REGION_REJECTED, MSG_REGISTER_REGION, MSG_TOUCH_DOWN, MSG_TOUCH_MOVE, MSG_TOUCH_UP,
    MSG_UNREGISTER_REGION, REJECT_CONFLICT, REJECT_INVALID,
};

const FIELD: usize = std::mem::size_of::<i32>();

pub const REGISTER_SIZE: usize = 7 * FIELD;
pub const UNREGISTER_SIZE: usize = 2 * FIELD;
pub const TOUCH_SIZE: usize = 7 * FIELD;
#[cfg(test)]
pub const REJECTED_SIZE: usize = 3 * FIELD;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownTag(i32),
    #[cfg(test)]
    #[error("invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: i32 },
}

/// Client -> server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    Register {
        region_id: i32,
        screen_index: i32,
        rect: Rect,
    },
    Unregister {
        region_id: i32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Down,
    Move,
    Up,
}

impl TouchPhase {
    fn tag(self) -> i32 {
        match self {
            TouchPhase::Down => MSG_TOUCH_DOWN,
            TouchPhase::Move => MSG_TOUCH_MOVE,
            TouchPhase::Up => MSG_TOUCH_UP,
        }
    }
}

/// A touch forwarded to a region owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchMessage {
    pub phase: TouchPhase,
    pub region_id: i32,
    pub touch_id: i32,
    /// Relative to the region's top-left corner
    pub x: i32,
    pub y: i32,
    /// Logical desktop coordinates
    pub abs_x: i32,
    pub abs_y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Id already owned by another client
    Conflict,
    /// Negative screen or empty rectangle
    Invalid,
}

impl RejectReason {
    fn code(self) -> i32 {
        match self {
            RejectReason::Conflict => REJECT_CONFLICT,
            RejectReason::Invalid => REJECT_INVALID,
        }
    }
}

/// Server -> client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage {
    Touch(TouchMessage),
    Rejected { region_id: i32, reason: RejectReason },
}

fn field(buf: &[u8], n: usize) -> i32 {
    let mut raw = [0u8; FIELD];
    raw.copy_from_slice(&buf[n * FIELD..(n + 1) * FIELD]);
    i32::from_ne_bytes(raw)
}

fn put(out: &mut Vec<u8>, values: &[i32]) {
    for v in values {
        out.extend_from_slice(&v.to_ne_bytes());
    }
}

/// Size of the message starting with `tag`, if the tag is known
fn client_message_size(tag: i32) -> Option<usize> {
    match tag {
        MSG_REGISTER_REGION => Some(REGISTER_SIZE),
        MSG_UNREGISTER_REGION => Some(UNREGISTER_SIZE),
        _ => None,
    }
}

impl ClientMessage {
    /// Decode the first message in `buf`.
    ///
    /// Returns the message and the bytes it occupied, or Ok(None) when
    /// the buffer does not yet hold a complete message.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        if buf.len() < FIELD {
            return Ok(None);
        }
        let tag = field(buf, 0);
        let size = client_message_size(tag).ok_or(ProtocolError::UnknownTag(tag))?;
        if buf.len() < size {
            return Ok(None);
        }

        let msg = match tag {
            MSG_REGISTER_REGION => ClientMessage::Register {
                region_id: field(buf, 1),
                screen_index: field(buf, 2),
                rect: Rect {
                    x: field(buf, 3),
                    y: field(buf, 4),
                    width: field(buf, 5),
                    height: field(buf, 6),
                },
            },
            _ => ClientMessage::Unregister {
                region_id: field(buf, 1),
            },
        };
        Ok(Some((msg, size)))
    }

    /// Client side of the codec
    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REGISTER_SIZE);
        match *self {
            ClientMessage::Register {
                region_id,
                screen_index,
                rect,
            } => put(
                &mut out,
                &[
                    MSG_REGISTER_REGION,
                    region_id,
                    screen_index,
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height,
                ],
            ),
            ClientMessage::Unregister { region_id } => {
                put(&mut out, &[MSG_UNREGISTER_REGION, region_id])
            }
        }
        out
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TOUCH_SIZE);
        match *self {
            ServerMessage::Touch(t) => put(
                &mut out,
                &[t.phase.tag(), t.region_id, t.touch_id, t.x, t.y, t.abs_x, t.abs_y],
            ),
            ServerMessage::Rejected { region_id, reason } => {
                put(&mut out, &[MSG_REGION_REJECTED, region_id, reason.code()])
            }
        }
        out
    }

    /// Decode the first message in `buf` (client side)
    #[cfg(test)]
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        if buf.len() < FIELD {
            return Ok(None);
        }
        let tag = field(buf, 0);
        let size = match tag {
            MSG_TOUCH_DOWN | MSG_TOUCH_MOVE | MSG_TOUCH_UP => TOUCH_SIZE,
            MSG_REGION_REJECTED => REJECTED_SIZE,
            _ => return Err(ProtocolError::UnknownTag(tag)),
        };
        if buf.len() < size {
            return Ok(None);
        }

        let msg = match tag {
            MSG_REGION_REJECTED => {
                let reason = match field(buf, 2) {
                    REJECT_CONFLICT => RejectReason::Conflict,
                    REJECT_INVALID => RejectReason::Invalid,
                    value => {
                        return Err(ProtocolError::InvalidValue {
                            field: "reason",
                            value,
                        })
                    }
                };
                ServerMessage::Rejected {
                    region_id: field(buf, 1),
                    reason,
                }
            }
            _ => {
                let phase = match tag {
                    MSG_TOUCH_DOWN => TouchPhase::Down,
                    MSG_TOUCH_MOVE => TouchPhase::Move,
                    _ => TouchPhase::Up,
                };
                ServerMessage::Touch(TouchMessage {
                    phase,
                    region_id: field(buf, 1),
                    touch_id: field(buf, 2),
                    x: field(buf, 3),
                    y: field(buf, 4),
                    abs_x: field(buf, 5),
                    abs_y: field(buf, 6),
                })
            }
        };
        Ok(Some((msg, size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_bytes() -> Vec<u8> {
        ClientMessage::Register {
            region_id: 1,
            screen_index: 1,
            rect: Rect {
                x: 10,
                y: 10,
                width: 100,
                height: 50,
            },
        }
        .encode()
    }

    #[test]
    fn test_message_sizes() {
        assert_eq!(REGISTER_SIZE, 28);
        assert_eq!(UNREGISTER_SIZE, 8);
        assert_eq!(TOUCH_SIZE, 28);
        assert_eq!(REJECTED_SIZE, 12);
        assert_eq!(register_bytes().len(), REGISTER_SIZE);
    }

    #[test]
    fn test_partial_message_waits_for_more() {
        let bytes = register_bytes();
        assert_eq!(ClientMessage::decode(&bytes[..2]), Ok(None));
        assert_eq!(ClientMessage::decode(&bytes[..20]), Ok(None));
        let (msg, used) = ClientMessage::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, REGISTER_SIZE);
        assert!(matches!(msg, ClientMessage::Register { region_id: 1, .. }));
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut bytes = register_bytes();
        bytes.extend(ClientMessage::Unregister { region_id: 1 }.encode());
        let (_, used) = ClientMessage::decode(&bytes).unwrap().unwrap();
        let (msg, rest) = ClientMessage::decode(&bytes[used..]).unwrap().unwrap();
        assert_eq!(msg, ClientMessage::Unregister { region_id: 1 });
        assert_eq!(used + rest, bytes.len());
    }

    #[test]
    fn test_unknown_tag() {
        let bytes = 99i32.to_ne_bytes();
        assert_eq!(
            ClientMessage::decode(&bytes),
            Err(ProtocolError::UnknownTag(99))
        );
        // Server tags are not valid from a client
        let bytes = MSG_TOUCH_DOWN.to_ne_bytes();
        assert_eq!(
            ClientMessage::decode(&bytes),
            Err(ProtocolError::UnknownTag(MSG_TOUCH_DOWN))
        );
    }

    #[test]
    fn test_touch_layout() {
        let bytes = ServerMessage::Touch(TouchMessage {
            phase: TouchPhase::Down,
            region_id: 1,
            touch_id: 10,
            x: 5,
            y: 5,
            abs_x: 15,
            abs_y: 1295,
        })
        .encode();
        let fields: Vec<i32> = bytes
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(fields, vec![MSG_TOUCH_DOWN, 1, 10, 5, 5, 15, 1295]);
    }

    #[test]
    fn test_rejected_layout() {
        let bytes = ServerMessage::Rejected {
            region_id: 3,
            reason: RejectReason::Conflict,
        }
        .encode();
        assert_eq!(bytes.len(), REJECTED_SIZE);
        assert_eq!(
            ServerMessage::decode(&bytes),
            Ok(Some((
                ServerMessage::Rejected {
                    region_id: 3,
                    reason: RejectReason::Conflict
                },
                REJECTED_SIZE
            )))
        );
    }
}
