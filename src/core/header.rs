//! # Headers
//!
//! OBEX headers are self-describing fields identified by a one-byte header
//! identifier (HI). The upper two bits of the HI select how the value is
//! encoded on the wire:
//!
//! | bits | encoding                                   | wire layout                 |
//! |------|--------------------------------------------|-----------------------------|
//! | `00` | null-terminated UTF-16BE text              | `[HI] [Len(2)] [Text]`      |
//! | `01` | byte sequence                              | `[HI] [Len(2)] [Bytes]`     |
//! | `10` | single byte                                | `[HI] [Byte]`               |
//! | `11` | 4-byte big-endian integer                  | `[HI] [U32]`                |
//!
//! `Len` counts the whole header including the HI and the length field itself.
//!
//! A [`Header`] keeps the raw payload and converts it to typed values on
//! demand. A [`HeaderSet`] holds at most one header per identifier.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::trace;

use crate::core::app_params::{AppParameter, AppParameterDictionary};
use crate::core::bounded::BoundedReader;
use crate::error::{constants, ObexError, Result};

/// Size of `[HI] [Len(2)]` for variable-length headers.
pub const VARIABLE_HEADER_PREFIX: usize = 3;

/// Largest payload a variable-length header can carry.
pub const MAX_VARIABLE_PAYLOAD: usize = u16::MAX as usize - VARIABLE_HEADER_PREFIX;

/// How a header value is laid out on the wire, from the top two bits of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEncoding {
    Unicode,
    ByteSequence,
    OneByte,
    FourBytes,
}

impl HeaderEncoding {
    pub const fn from_id(id: u8) -> Self {
        match id & 0xC0 {
            0x00 => Self::Unicode,
            0x40 => Self::ByteSequence,
            0x80 => Self::OneByte,
            _ => Self::FourBytes,
        }
    }

    /// Payload size for the fixed kinds, None for length-prefixed kinds.
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            Self::OneByte => Some(1),
            Self::FourBytes => Some(4),
            Self::Unicode | Self::ByteSequence => None,
        }
    }
}

/// A header identifier (HI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderId(u8);

impl HeaderId {
    /// Number of objects.
    pub const COUNT: Self = Self(0xC0);
    /// Name of the object, typically a file name.
    pub const NAME: Self = Self(0x01);
    /// MIME type of the object.
    pub const TYPE: Self = Self(0x42);
    /// Length of the object in bytes.
    pub const LENGTH: Self = Self(0xC3);
    pub const TIME_ISO8601: Self = Self(0x44);
    pub const TIME_4BYTE: Self = Self(0xC4);
    pub const DESCRIPTION: Self = Self(0x05);
    /// Service the operation is directed at.
    pub const TARGET: Self = Self(0x46);
    pub const HTTP: Self = Self(0x47);
    /// A chunk of the object body.
    pub const BODY: Self = Self(0x48);
    /// The final chunk of the object body.
    pub const END_OF_BODY: Self = Self(0x49);
    /// Identifies the service answering a targeted connect.
    pub const WHO: Self = Self(0x4A);
    pub const CONNECTION_ID: Self = Self(0xCB);
    pub const APP_PARAMETERS: Self = Self(0x4C);
    pub const AUTH_CHALLENGE: Self = Self(0x4D);
    pub const AUTH_RESPONSE: Self = Self(0x4E);
    pub const CREATOR_ID: Self = Self(0xCF);
    pub const WAN_UUID: Self = Self(0x50);
    pub const OBJECT_CLASS: Self = Self(0x51);
    pub const SESSION_PARAMETERS: Self = Self(0x52);
    pub const SESSION_SEQUENCE_NUMBER: Self = Self(0x93);
    pub const ACTION_ID: Self = Self(0x94);
    pub const DEST_NAME: Self = Self(0x15);
    pub const PERMISSIONS: Self = Self(0xD6);
    pub const SINGLE_RESPONSE_MODE: Self = Self(0x97);
    pub const SINGLE_RESPONSE_MODE_PARAMETERS: Self = Self(0x98);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn encoding(self) -> HeaderEncoding {
        HeaderEncoding::from_id(self.0)
    }
}

impl From<u8> for HeaderId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for HeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Character encoding used to interpret string content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// Big-endian UTF-16, the native encoding of unicode headers.
    Utf16Be,
    Utf8,
    Ascii,
}

impl TextEncoding {
    fn encode(self, text: &str, null_terminated: bool) -> Result<Bytes> {
        let mut out = BytesMut::new();
        match self {
            Self::Utf16Be => {
                for unit in text.encode_utf16() {
                    out.put_u16(unit);
                }
                if null_terminated {
                    out.put_u16(0);
                }
            }
            Self::Utf8 | Self::Ascii => {
                if self == Self::Ascii && !text.is_ascii() {
                    return Err(ObexError::InvalidText(
                        constants::ERR_INVALID_ASCII.to_string(),
                    ));
                }
                out.put_slice(text.as_bytes());
                if null_terminated {
                    out.put_u8(0);
                }
            }
        }
        Ok(out.freeze())
    }

    fn decode(self, payload: &[u8], strip_terminator: bool) -> Result<String> {
        let mut text = match self {
            Self::Utf16Be => {
                if payload.len() % 2 != 0 {
                    return Err(ObexError::InvalidText(
                        constants::ERR_ODD_UTF16_LENGTH.to_string(),
                    ));
                }
                let units: Vec<u16> = payload
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|_| {
                    ObexError::InvalidText(constants::ERR_INVALID_UTF16.to_string())
                })?
            }
            Self::Utf8 => String::from_utf8(payload.to_vec())
                .map_err(|_| ObexError::InvalidText(constants::ERR_INVALID_UTF8.to_string()))?,
            Self::Ascii => {
                if !payload.is_ascii() {
                    return Err(ObexError::InvalidText(
                        constants::ERR_INVALID_ASCII.to_string(),
                    ));
                }
                String::from_utf8_lossy(payload).into_owned()
            }
        };
        if strip_terminator && text.ends_with('\0') {
            text.pop();
        }
        Ok(text)
    }
}

/// A single OBEX header: identifier plus raw payload.
#[derive(Debug, Clone)]
pub struct Header {
    id: HeaderId,
    payload: Bytes,
    text_encoding: TextEncoding,
}

impl Header {
    /// Build a header from a raw payload, validating the payload against the
    /// encoding selected by `id`.
    pub fn new(id: impl Into<HeaderId>, payload: impl Into<Bytes>) -> Result<Self> {
        let id = id.into();
        let payload = payload.into();
        match id.encoding().fixed_len() {
            Some(len) if payload.len() != len => {
                return Err(ObexError::InvalidHeaderValue(format!(
                    "header {id} carries {} bytes, expected {len}",
                    payload.len()
                )));
            }
            None if payload.len() > MAX_VARIABLE_PAYLOAD => {
                return Err(ObexError::PacketTooLarge(
                    payload.len() + VARIABLE_HEADER_PREFIX,
                ));
            }
            _ => {}
        }
        Ok(Self::raw(id, payload))
    }

    fn raw(id: HeaderId, payload: Bytes) -> Self {
        let text_encoding = match id.encoding() {
            HeaderEncoding::Unicode => TextEncoding::Utf16Be,
            _ => TextEncoding::Utf8,
        };
        Self {
            id,
            payload,
            text_encoding,
        }
    }

    /// A string-valued header for a length-prefixed `id`.
    pub fn text(
        id: impl Into<HeaderId>,
        text: &str,
        encoding: TextEncoding,
        null_terminated: bool,
    ) -> Result<Self> {
        let id = id.into();
        if id.encoding().fixed_len().is_some() {
            return Err(ObexError::InvalidHeaderValue(format!(
                "header {id} cannot carry text"
            )));
        }
        let mut header = Self::new(id, encoding.encode(text, null_terminated)?)?;
        header.text_encoding = encoding;
        Ok(header)
    }

    pub fn u8(id: impl Into<HeaderId>, value: u8) -> Result<Self> {
        Self::new(id, vec![value])
    }

    pub fn u32(id: impl Into<HeaderId>, value: u32) -> Result<Self> {
        Self::new(id, value.to_be_bytes().to_vec())
    }

    fn four_bytes(id: HeaderId, value: u32) -> Self {
        Self::raw(id, Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    fn utf16(id: HeaderId, text: &str) -> Self {
        let mut units = BytesMut::with_capacity((text.len() + 1) * 2);
        for unit in text.encode_utf16() {
            units.put_u16(unit);
        }
        units.put_u16(0);
        Self::raw(id, units.freeze())
    }

    /// Name header, null-terminated UTF-16.
    pub fn name(name: &str) -> Self {
        Self::utf16(HeaderId::NAME, name)
    }

    pub fn description(description: &str) -> Self {
        Self::utf16(HeaderId::DESCRIPTION, description)
    }

    /// Type header, a null-terminated MIME type string.
    pub fn mime_type(mime: &str) -> Self {
        let mut payload = BytesMut::with_capacity(mime.len() + 1);
        payload.put_slice(mime.as_bytes());
        payload.put_u8(0);
        Self::raw(HeaderId::TYPE, payload.freeze())
    }

    pub fn length(length: u32) -> Self {
        Self::four_bytes(HeaderId::LENGTH, length)
    }

    pub fn count(count: u32) -> Self {
        Self::four_bytes(HeaderId::COUNT, count)
    }

    pub fn connection_id(id: u32) -> Self {
        Self::four_bytes(HeaderId::CONNECTION_ID, id)
    }

    pub fn target(service: impl Into<Bytes>) -> Self {
        Self::raw(HeaderId::TARGET, service.into())
    }

    pub fn who(service: impl Into<Bytes>) -> Self {
        Self::raw(HeaderId::WHO, service.into())
    }

    pub fn body(chunk: impl Into<Bytes>) -> Self {
        Self::raw(HeaderId::BODY, chunk.into())
    }

    pub fn end_of_body(chunk: impl Into<Bytes>) -> Self {
        Self::raw(HeaderId::END_OF_BODY, chunk.into())
    }

    /// Application-Parameters header carrying `params` in order.
    pub fn app_parameters<'a>(params: impl IntoIterator<Item = &'a AppParameter>) -> Result<Self> {
        Self::new(HeaderId::APP_PARAMETERS, AppParameterDictionary::encode(params)?)
    }

    pub fn id(&self) -> HeaderId {
        self.id
    }

    pub fn encoding(&self) -> HeaderEncoding {
        self.id.encoding()
    }

    pub fn text_encoding(&self) -> TextEncoding {
        self.text_encoding
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self.encoding().fixed_len() {
            Some(len) => 1 + len,
            None => VARIABLE_HEADER_PREFIX + self.payload.len(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let total = self.encoded_len();
        buf.reserve(total);
        buf.put_u8(self.id.value());
        if self.encoding().fixed_len().is_none() {
            let total = u16::try_from(total).map_err(|_| ObexError::PacketTooLarge(total))?;
            buf.put_u16(total);
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Decode the value of a header whose identifier has already been read.
    pub fn decode<B: Buf>(id: HeaderId, reader: &mut BoundedReader<'_, B>) -> Result<Self> {
        let payload = match id.encoding().fixed_len() {
            Some(len) => reader.read_bytes(len)?,
            None => {
                let total = reader.read_u16()? as usize;
                let len = total.checked_sub(VARIABLE_HEADER_PREFIX).ok_or_else(|| {
                    ObexError::malformed(constants::ERR_HEADER_LENGTH_BELOW_PREFIX)
                })?;
                reader.read_bytes(len)?
            }
        };
        trace!(%id, len = payload.len(), "Decoded OBEX header");
        Ok(Self::raw(id, payload))
    }

    /// Read the identifier byte and then the value.
    pub fn decode_next<B: Buf>(reader: &mut BoundedReader<'_, B>) -> Result<Self> {
        let id = HeaderId::new(reader.read_u8()?);
        Self::decode(id, reader)
    }

    pub fn as_u8(&self) -> Result<u8> {
        let [v] = self.fixed::<1>()?;
        Ok(v)
    }

    pub fn as_u16(&self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.fixed::<2>()?))
    }

    pub fn as_u32(&self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.fixed::<4>()?))
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        self.payload[..].try_into().map_err(|_| {
            ObexError::InvalidHeaderValue(format!(
                "header {} is {} bytes, expected {N}",
                self.id,
                self.payload.len()
            ))
        })
    }

    /// Interpret the payload as big-endian UTF-16.
    pub fn as_unicode_string(&self, strip_terminator: bool) -> Result<String> {
        TextEncoding::Utf16Be.decode(&self.payload, strip_terminator)
    }

    /// Interpret the payload with the header's recorded text encoding.
    pub fn as_text(&self, strip_terminator: bool) -> Result<String> {
        self.text_encoding.decode(&self.payload, strip_terminator)
    }

    pub fn as_app_parameters(&self) -> Result<AppParameterDictionary> {
        AppParameterDictionary::decode(&self.payload)
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.payload == other.payload
    }
}

impl Eq for Header {}

/// The headers of one packet, at most one per identifier.
///
/// Inserting a header whose identifier is already present replaces the
/// earlier value in place; otherwise insertion order is preserved, which is
/// the order headers are written in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: Vec<Header>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_headers(headers: impl IntoIterator<Item = Header>) -> Self {
        let mut set = Self::new();
        for header in headers {
            set.insert(header);
        }
        set
    }

    /// Insert or replace. Returns the header previously stored under the id.
    pub fn insert(&mut self, header: Header) -> Option<Header> {
        match self.headers.iter_mut().find(|h| h.id == header.id) {
            Some(slot) => Some(std::mem::replace(slot, header)),
            None => {
                self.headers.push(header);
                None
            }
        }
    }

    /// # Errors
    /// Returns [`ObexError::HeaderNotFound`] if no header has `id`.
    pub fn get(&self, id: HeaderId) -> Result<&Header> {
        self.try_get(id).ok_or(ObexError::HeaderNotFound(id.value()))
    }

    pub fn try_get(&self, id: HeaderId) -> Option<&Header> {
        self.headers.iter().find(|h| h.id == id)
    }

    pub fn remove(&mut self, id: HeaderId) -> Option<Header> {
        let idx = self.headers.iter().position(|h| h.id == id)?;
        Some(self.headers.remove(idx))
    }

    pub fn contains(&self, id: HeaderId) -> bool {
        self.try_get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        self.headers.iter().map(Header::encoded_len).sum()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        self.headers.iter().try_for_each(|h| h.encode(buf))
    }

    /// Decode headers until the reader's quota is used up.
    pub fn decode<B: Buf>(reader: &mut BoundedReader<'_, B>) -> Result<Self> {
        let mut set = Self::new();
        while !reader.is_exhausted() {
            set.insert(Header::decode_next(reader)?);
        }
        Ok(set)
    }
}

impl IntoIterator for HeaderSet {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.into_iter()
    }
}
