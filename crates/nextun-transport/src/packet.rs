// ============================================
// File: crates/nextun-transport/src/packet.rs
// ============================================
//! # Data Channel Framing
//!
//! ## Creation Reason
//! Data channels are byte streams. This module cuts them into frames
//! and gives each frame a meaning.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────────┬─────────────────────────┐
//! │ Kind (1) │ Length (2)   │ Payload (Length bytes)  │
//! │          │ u16, BE      │                         │
//! └──────────┴──────────────┴─────────────────────────┘
//! ```
//!
//! | Kind | Name      | Direction        | Payload                 |
//! |------|-----------|------------------|-------------------------|
//! | 0x01 | Hello     | client → server  | user id, u32 BE         |
//! | 0x02 | Channels  | server → client  | N × port, u16 BE        |
//! | 0x03 | Data      | both             | one raw IPv4 packet     |
//! | 0x04 | Heartbeat | both             | empty                   |
//!
//! ## ⚠️ Important Note for Next Developer
//! - The decoder never consumes a partial frame
//! - Unknown kinds are a protocol error; the connection is dropped
//!
//! ## Last Modified
//! v0.1.0 - Initial framing

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use nextun_common::types::{UserId, USER_ID_SIZE};

use crate::error::TransportError;

// ============================================
// Constants
// ============================================

/// Frame header length: kind + payload length.
pub const FRAME_HEADER_LEN: usize = 3;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

const PORT_SIZE: usize = 2;

// ============================================
// FrameKind
// ============================================

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client login on a data channel.
    Hello = 0x01,
    /// Active data channel ports.
    Channels = 0x02,
    /// One IP packet.
    Data = 0x03,
    /// Keep-alive.
    Heartbeat = 0x04,
}

impl FrameKind {
    /// Human-readable name used in errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Channels => "channels",
            Self::Data => "data",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Hello),
            0x02 => Ok(Self::Channels),
            0x03 => Ok(Self::Data),
            0x04 => Ok(Self::Heartbeat),
            other => Err(TransportError::UnknownFrameKind(other)),
        }
    }
}

// ============================================
// Frame
// ============================================

/// A decoded data channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Identifies the user that owns this connection.
    Hello(UserId),
    /// Ports the client may use, in slot order.
    Channels(Vec<u16>),
    /// One IP packet.
    Data(Bytes),
    /// Keep-alive.
    Heartbeat,
}

impl Frame {
    /// Returns the kind of this frame.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Hello(_) => FrameKind::Hello,
            Self::Channels(_) => FrameKind::Channels,
            Self::Data(_) => FrameKind::Data,
            Self::Heartbeat => FrameKind::Heartbeat,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Hello(_) => USER_ID_SIZE,
            Self::Channels(ports) => ports.len() * PORT_SIZE,
            Self::Data(packet) => packet.len(),
            Self::Heartbeat => 0,
        }
    }

    fn from_payload(kind: FrameKind, mut payload: Bytes) -> Result<Self, TransportError> {
        match kind {
            FrameKind::Hello => {
                if payload.len() != USER_ID_SIZE {
                    return Err(TransportError::malformed(
                        kind.name(),
                        format!("expected {USER_ID_SIZE} bytes, got {}", payload.len()),
                    ));
                }
                Ok(Self::Hello(UserId::new(payload.get_u32())))
            }
            FrameKind::Channels => {
                if payload.len() % PORT_SIZE != 0 {
                    return Err(TransportError::malformed(
                        kind.name(),
                        format!("odd payload length {}", payload.len()),
                    ));
                }
                let mut ports = Vec::with_capacity(payload.len() / PORT_SIZE);
                while payload.has_remaining() {
                    ports.push(payload.get_u16());
                }
                Ok(Self::Channels(ports))
            }
            FrameKind::Data => Ok(Self::Data(payload)),
            FrameKind::Heartbeat => {
                if !payload.is_empty() {
                    return Err(TransportError::malformed(kind.name(), "payload must be empty"));
                }
                Ok(Self::Heartbeat)
            }
        }
    }
}

// ============================================
// FrameCodec
// ============================================

/// `tokio_util` codec for [`Frame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let kind = FrameKind::try_from(src[0])?;
        let len = usize::from(u16::from_be_bytes([src[1], src[2]]));

        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Frame::from_payload(kind, payload).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), TransportError> {
        let len = frame.payload_len();
        let wire_len = u16::try_from(len).map_err(|_| TransportError::FrameTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        })?;

        dst.reserve(FRAME_HEADER_LEN + len);
        dst.put_u8(frame.kind() as u8);
        dst.put_u16(wire_len);

        match frame {
            Frame::Hello(user) => dst.put_slice(&user.to_bytes()),
            Frame::Channels(ports) => {
                for port in ports {
                    dst.put_u16(port);
                }
            }
            Frame::Data(packet) => dst.put_slice(&packet),
            Frame::Heartbeat => {}
        }

        Ok(())
    }
}

// ============================================
// Tests
// ============================================
