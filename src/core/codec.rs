//! # Packet Codec
//!
//! Frames OBEX packets over a byte stream for use with
//! [`tokio_util::codec::Framed`].
//!
//! The declared length in the packet prefix is checked against the receive
//! limit before any body bytes are buffered, so a peer can't make the decoder
//! hold more than one maximum-size packet.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::opcode::Opcode;
use crate::core::packet::{Packet, PacketLayout, MAX_PACKET_LENGTH, PACKET_PREFIX_LEN};
use crate::error::{constants, ObexError, Result};

/// Tokio codec for OBEX packets.
///
/// Decoding needs to know whether a connect field is expected, which depends
/// on what was last sent. Sessions switch the layout with
/// [`ObexCodec::set_layout`] around Connect exchanges.
#[derive(Debug, Clone)]
pub struct ObexCodec {
    layout: PacketLayout,
    max_frame_length: usize,
}

impl ObexCodec {
    pub fn new(layout: PacketLayout) -> Self {
        Self {
            layout,
            max_frame_length: MAX_PACKET_LENGTH as usize,
        }
    }

    /// Reject inbound packets declaring more than `max` bytes.
    pub fn with_max_frame_length(mut self, max: u16) -> Self {
        self.max_frame_length = max as usize;
        self
    }

    pub fn layout(&self) -> PacketLayout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: PacketLayout) {
        self.layout = layout;
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for ObexCodec {
    fn default() -> Self {
        Self::new(PacketLayout::Request)
    }
}

impl Decoder for ObexCodec {
    type Item = Packet;
    type Error = ObexError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < PACKET_PREFIX_LEN {
            return Ok(None);
        }

        let declared = u16::from_be_bytes([src[1], src[2]]) as usize;
        if declared < PACKET_PREFIX_LEN {
            return Err(ObexError::malformed(constants::ERR_LENGTH_BELOW_PREFIX));
        }
        if declared > self.max_frame_length {
            return Err(ObexError::malformed(constants::ERR_FRAME_OVER_LIMIT));
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(declared).freeze();
        let opcode = Opcode::from_byte(frame[0])?;
        bytes::Buf::advance(&mut frame, PACKET_PREFIX_LEN);
        Packet::decode_body(opcode, &mut frame, declared - PACKET_PREFIX_LEN, self.layout).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(ObexError::TruncatedPacket),
        }
    }
}

impl Encoder<Packet> for ObexCodec {
    type Error = ObexError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        packet.encode(dst)
    }
}

impl Encoder<&Packet> for ObexCodec {
    type Error = ObexError;

    fn encode(&mut self, packet: &Packet, dst: &mut BytesMut) -> Result<()> {
        packet.encode(dst)
    }
}
