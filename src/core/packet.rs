//! # Packets
//!
//! An OBEX packet is an opcode, the total packet length and a list of headers.
//! Connect requests and their responses carry a 4-byte field between the
//! length and the headers.
//!
//! ```text
//! [Opcode(1)] [Length(2)] [Version(1) Flags(1) MaxPacketLength(2)]? [Headers...]
//! ```
//!
//! `Length` counts the whole packet, prefix included, and is big-endian.
//!
//! Whether a packet carries the connect field can't be told from the bytes
//! alone: a response to Connect is a plain `0xA0` opcode. The reader passes a
//! [`PacketLayout`] describing what it expects.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::core::bounded::BoundedReader;
use crate::core::header::{Header, HeaderId, HeaderSet};
use crate::core::opcode::{Opcode, Operation};
use crate::error::{constants, ObexError, Result};

/// `[Opcode(1)] [Length(2)]`
pub const PACKET_PREFIX_LEN: usize = 3;

/// `[Version(1)] [Flags(1)] [MaxPacketLength(2)]`
pub const CONNECT_PARAMS_LEN: usize = 4;

/// OBEX 1.0, major version in the high nibble.
pub const OBEX_VERSION: u8 = 0x10;

/// Smallest maximum packet length a peer may advertise.
pub const MIN_MAX_PACKET_LENGTH: u16 = 255;

/// Largest packet the length field can describe.
pub const MAX_PACKET_LENGTH: u16 = u16::MAX;

/// Parameters exchanged by Connect and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub version: u8,
    pub flags: u8,
    pub max_packet_length: u16,
}

impl ConnectParams {
    pub fn new(max_packet_length: u16) -> Self {
        Self {
            version: OBEX_VERSION,
            flags: 0,
            max_packet_length,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u16(self.max_packet_length);
    }

    fn decode<B: Buf>(reader: &mut BoundedReader<'_, B>) -> Result<Self> {
        if reader.remaining_quota() < CONNECT_PARAMS_LEN {
            return Err(ObexError::malformed(constants::ERR_MISSING_CONNECT_FIELDS));
        }
        Ok(Self {
            version: reader.read_u8()?,
            flags: reader.read_u8()?,
            max_packet_length: reader.read_u16()?,
        })
    }
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self::new(MAX_PACKET_LENGTH)
    }
}

/// Tells the reader whether to expect the connect field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketLayout {
    /// Requests: the field is present iff the opcode is Connect.
    #[default]
    Request,
    /// Ordinary responses, never a connect field.
    Response,
    /// The response to a Connect request. Carries a connect field unless it
    /// is a bare three-byte refusal.
    ConnectResponse,
}

impl PacketLayout {
    /// Whether a packet with `opcode` and `body_len` bytes after the prefix
    /// starts with a connect field.
    pub fn has_connect_params(self, opcode: Opcode, body_len: usize) -> bool {
        match self {
            Self::Request => opcode.is(Operation::Connect),
            Self::Response => false,
            Self::ConnectResponse => body_len > 0,
        }
    }
}

/// A single OBEX request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: Opcode,
    connect: Option<ConnectParams>,
    headers: HeaderSet,
}

impl Packet {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            connect: None,
            headers: HeaderSet::new(),
        }
    }

    pub fn with_headers(opcode: Opcode, headers: HeaderSet) -> Self {
        Self {
            opcode,
            connect: None,
            headers,
        }
    }

    /// A request for `operation`. Fails for always-final requests when
    /// `is_final` is false.
    pub fn request(operation: Operation, is_final: bool) -> Result<Self> {
        Ok(Self::new(Opcode::new(operation, is_final)?))
    }

    /// A response with the final bit set. Responses are always final.
    pub fn response(operation: Operation) -> Self {
        Self::new(Opcode::final_of(operation))
    }

    /// Connect request. An empty `target` is left out.
    pub fn connect(params: ConnectParams, target: impl Into<Bytes>) -> Self {
        let target = target.into();
        let mut packet = Self::new(Opcode::final_of(Operation::Connect));
        packet.connect = Some(params);
        if !target.is_empty() {
            packet.add_header(Header::target(target));
        }
        packet
    }

    pub fn connect_response(operation: Operation, params: ConnectParams) -> Self {
        let mut packet = Self::response(operation);
        packet.connect = Some(params);
        packet
    }

    pub fn disconnect() -> Self {
        Self::new(Opcode::final_of(Operation::Disconnect))
    }

    pub fn abort() -> Self {
        Self::new(Opcode::final_of(Operation::Abort))
    }

    /// The bare follow-up request sent after a Continue: same operation,
    /// final bit set, no headers.
    pub fn continuation(&self) -> Result<Self> {
        let operation = self
            .opcode
            .operation()
            .ok_or(ObexError::InvalidOpcode(self.opcode.value()))?;
        Ok(Self::new(Opcode::final_of(operation)))
    }

    /// Builder form of [`Packet::add_header`].
    pub fn with_header(mut self, header: Header) -> Self {
        self.add_header(header);
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.opcode = opcode;
    }

    pub fn connect_params(&self) -> Option<&ConnectParams> {
        self.connect.as_ref()
    }

    pub fn set_connect_params(&mut self, params: Option<ConnectParams>) {
        self.connect = params;
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderSet {
        &mut self.headers
    }

    pub fn into_headers(self) -> HeaderSet {
        self.headers
    }

    /// # Errors
    /// Returns [`ObexError::HeaderNotFound`] if the packet has no such header.
    pub fn header(&self, id: HeaderId) -> Result<&Header> {
        self.headers.get(id)
    }

    pub fn try_header(&self, id: HeaderId) -> Option<&Header> {
        self.headers.try_get(id)
    }

    /// Store `header`, replacing any header with the same id in place.
    pub fn add_header(&mut self, header: Header) {
        self.headers.insert(header);
    }

    /// Like [`Packet::add_header`] but hands back the replaced header.
    pub fn replace_header(&mut self, header: Header) -> Option<Header> {
        self.headers.insert(header)
    }

    pub fn remove_header(&mut self, id: HeaderId) -> Option<Header> {
        self.headers.remove(id)
    }

    /// Body payload followed by End-Of-Body payload.
    pub fn body_content(&self) -> Bytes {
        let body = self.try_header(HeaderId::BODY).map(Header::payload);
        let end = self.try_header(HeaderId::END_OF_BODY).map(Header::payload);
        match (body, end) {
            (Some(b), None) => b.clone(),
            (None, Some(e)) => e.clone(),
            (None, None) => Bytes::new(),
            (Some(b), Some(e)) => {
                let mut out = BytesMut::with_capacity(b.len() + e.len());
                out.put_slice(b);
                out.put_slice(e);
                out.freeze()
            }
        }
    }

    pub fn body_content_as_utf8(&self, strip_terminator: bool) -> Result<String> {
        let body = self.body_content();
        let mut text = String::from_utf8(body.to_vec())
            .map_err(|_| ObexError::InvalidText(constants::ERR_INVALID_UTF8.to_string()))?;
        if strip_terminator && text.ends_with('\0') {
            text.pop();
        }
        Ok(text)
    }

    /// Text of the Name header without its terminator, if present and valid.
    pub fn name(&self) -> Option<String> {
        self.try_header(HeaderId::NAME)
            .and_then(|h| h.as_unicode_string(true).ok())
    }

    /// Text of the Type header, if present and valid.
    pub fn mime_type(&self) -> Option<String> {
        self.try_header(HeaderId::TYPE)
            .and_then(|h| h.as_text(true).ok())
    }

    pub fn encoded_len(&self) -> usize {
        let extra = if self.connect.is_some() {
            CONNECT_PARAMS_LEN
        } else {
            0
        };
        PACKET_PREFIX_LEN + extra + self.headers.encoded_len()
    }

    /// # Errors
    /// Returns [`ObexError::PacketTooLarge`] when the packet does not fit the
    /// 16-bit length field.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let total = self.encoded_len();
        let length = u16::try_from(total).map_err(|_| ObexError::PacketTooLarge(total))?;
        buf.reserve(total);
        buf.put_u8(self.opcode.value());
        buf.put_u16(length);
        if let Some(params) = &self.connect {
            params.encode(buf);
        }
        self.headers.encode(buf)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one packet from the front of `src`.
    ///
    /// # Errors
    /// - [`ObexError::InvalidOpcode`] for an unknown opcode byte
    /// - [`ObexError::MalformedPacket`] when the declared length is below 3 or
    ///   the headers do not end exactly at the declared length
    /// - [`ObexError::TruncatedPacket`] when `src` ends early
    pub fn decode<B: Buf>(src: &mut B, layout: PacketLayout) -> Result<Self> {
        if src.remaining() < PACKET_PREFIX_LEN {
            return Err(ObexError::TruncatedPacket);
        }
        let opcode = Opcode::from_byte(src.get_u8())?;
        let declared = src.get_u16() as usize;
        let body_len = declared
            .checked_sub(PACKET_PREFIX_LEN)
            .ok_or_else(|| ObexError::malformed(constants::ERR_LENGTH_BELOW_PREFIX))?;
        Self::decode_body(opcode, src, body_len, layout)
    }

    /// Decode the part after the prefix, `body_len` bytes long.
    pub fn decode_body<B: Buf>(
        opcode: Opcode,
        src: &mut B,
        body_len: usize,
        layout: PacketLayout,
    ) -> Result<Self> {
        let mut reader = BoundedReader::new(src, body_len);
        let connect = if layout.has_connect_params(opcode, body_len) {
            Some(ConnectParams::decode(&mut reader)?)
        } else {
            None
        };
        // A header running past the packet is a framing fault of the packet.
        let headers = HeaderSet::decode(&mut reader).map_err(|e| match e {
            ObexError::QuotaExceeded { .. } => {
                ObexError::malformed(constants::ERR_HEADERS_DID_NOT_EXHAUST)
            }
            other => other,
        })?;
        if !reader.is_exhausted() {
            return Err(ObexError::malformed(constants::ERR_HEADERS_DID_NOT_EXHAUST));
        }
        trace!(%opcode, body_len, headers = headers.len(), "Decoded OBEX packet");
        Ok(Self {
            opcode,
            connect,
            headers,
        })
    }

    /// Read exactly one packet from `stream`.
    ///
    /// A stream that ends before the first byte yields
    /// [`ObexError::ConnectionClosed`]; one that ends inside the packet yields
    /// [`ObexError::TruncatedPacket`].
    pub async fn read<S>(stream: &mut S, layout: PacketLayout) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        Self::read_optional(stream, layout)
            .await?
            .ok_or(ObexError::ConnectionClosed)
    }

    /// Like [`Packet::read`] but returns `None` on a clean end of stream.
    pub async fn read_optional<S>(stream: &mut S, layout: PacketLayout) -> Result<Option<Self>>
    where
        S: AsyncRead + Unpin,
    {
        let mut prefix = [0u8; PACKET_PREFIX_LEN];
        if stream.read(&mut prefix[..1]).await? == 0 {
            return Ok(None);
        }
        read_exact_or_truncated(stream, &mut prefix[1..]).await?;

        let opcode = Opcode::from_byte(prefix[0])?;
        let declared = u16::from_be_bytes([prefix[1], prefix[2]]) as usize;
        let body_len = declared
            .checked_sub(PACKET_PREFIX_LEN)
            .ok_or_else(|| ObexError::malformed(constants::ERR_LENGTH_BELOW_PREFIX))?;

        let mut body = vec![0u8; body_len];
        read_exact_or_truncated(stream, &mut body).await?;
        let mut body = Bytes::from(body);
        Self::decode_body(opcode, &mut body, body_len, layout).map(Some)
    }

    /// Encode, write and flush.
    pub async fn write<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let bytes = self.to_bytes()?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }
}

async fn read_exact_or_truncated<S>(stream: &mut S, buf: &mut [u8]) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ObexError::TruncatedPacket),
        Err(e) => Err(e.into()),
    }
}
