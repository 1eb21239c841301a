//! # Opcodes
//!
//! Classification of the single byte that opens every OBEX packet.
//!
//! The low 7 bits select an [`Operation`] and bit 7 is the final flag. Requests
//! that are complete in a single packet (Connect, Disconnect, SetPath, Session,
//! Abort) always carry the final bit; every other operation, including the
//! response codes, lets the caller choose.
//!
//! ```text
//! +---+---------------+
//! | F |   operation   |
//! +---+---------------+
//!  bit 7    bits 0-6
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ObexError, Result};

/// Bit 7 of the opcode byte.
pub const FINAL_BIT: u8 = 0x80;

/// Raw opcodes reserved for author-allocated operations. Never accepted.
const USER_DEFINED_RANGE: std::ops::RangeInclusive<u8> = 0x11..=0x1F;

/// Every operation and response code the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    // Requests
    Connect,
    Disconnect,
    Put,
    Get,
    SetPath,
    Action,
    Session,
    Abort,

    // Responses
    Continue,
    Success,
    Created,
    Accepted,
    NonAuthoritativeInformation,
    NoContent,
    ResetContent,
    PartialContent,
    MultipleChoices,
    MovedPermanently,
    MovedTemporarily,
    SeeOther,
    NotModified,
    UseProxy,
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeOut,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    RequestedEntityTooLarge,
    RequestedUrlTooLarge,
    UnsupportedMediaType,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
    DatabaseFull,
    DatabaseLocked,
}

impl Operation {
    /// The table value of the operation. Always-final requests are stored
    /// with bit 7 already set, everything else without it.
    pub const fn raw(self) -> u8 {
        match self {
            Self::Connect => 0x80,
            Self::Disconnect => 0x81,
            Self::Put => 0x02,
            Self::Get => 0x03,
            Self::SetPath => 0x85,
            Self::Action => 0x06,
            Self::Session => 0x87,
            Self::Abort => 0xFF,
            Self::Continue => 0x10,
            Self::Success => 0x20,
            Self::Created => 0x21,
            Self::Accepted => 0x22,
            Self::NonAuthoritativeInformation => 0x23,
            Self::NoContent => 0x24,
            Self::ResetContent => 0x25,
            Self::PartialContent => 0x26,
            Self::MultipleChoices => 0x30,
            Self::MovedPermanently => 0x31,
            Self::MovedTemporarily => 0x32,
            Self::SeeOther => 0x33,
            Self::NotModified => 0x34,
            Self::UseProxy => 0x35,
            Self::BadRequest => 0x40,
            Self::Unauthorized => 0x41,
            Self::PaymentRequired => 0x42,
            Self::Forbidden => 0x43,
            Self::NotFound => 0x44,
            Self::MethodNotAllowed => 0x45,
            Self::NotAcceptable => 0x46,
            Self::ProxyAuthenticationRequired => 0x47,
            Self::RequestTimeOut => 0x48,
            Self::Conflict => 0x49,
            Self::Gone => 0x4A,
            Self::LengthRequired => 0x4B,
            Self::PreconditionFailed => 0x4C,
            Self::RequestedEntityTooLarge => 0x4D,
            Self::RequestedUrlTooLarge => 0x4E,
            Self::UnsupportedMediaType => 0x4F,
            Self::InternalServerError => 0x50,
            Self::NotImplemented => 0x51,
            Self::BadGateway => 0x52,
            Self::ServiceUnavailable => 0x53,
            Self::GatewayTimeout => 0x54,
            Self::HttpVersionNotSupported => 0x55,
            Self::DatabaseFull => 0x60,
            Self::DatabaseLocked => 0x61,
        }
    }

    /// Exact table lookup, no masking.
    pub fn from_raw(raw: u8) -> Option<Self> {
        let op = match raw {
            0x80 => Self::Connect,
            0x81 => Self::Disconnect,
            0x02 => Self::Put,
            0x03 => Self::Get,
            0x85 => Self::SetPath,
            0x06 => Self::Action,
            0x87 => Self::Session,
            0xFF => Self::Abort,
            0x10 => Self::Continue,
            0x20 => Self::Success,
            0x21 => Self::Created,
            0x22 => Self::Accepted,
            0x23 => Self::NonAuthoritativeInformation,
            0x24 => Self::NoContent,
            0x25 => Self::ResetContent,
            0x26 => Self::PartialContent,
            0x30 => Self::MultipleChoices,
            0x31 => Self::MovedPermanently,
            0x32 => Self::MovedTemporarily,
            0x33 => Self::SeeOther,
            0x34 => Self::NotModified,
            0x35 => Self::UseProxy,
            0x40 => Self::BadRequest,
            0x41 => Self::Unauthorized,
            0x42 => Self::PaymentRequired,
            0x43 => Self::Forbidden,
            0x44 => Self::NotFound,
            0x45 => Self::MethodNotAllowed,
            0x46 => Self::NotAcceptable,
            0x47 => Self::ProxyAuthenticationRequired,
            0x48 => Self::RequestTimeOut,
            0x49 => Self::Conflict,
            0x4A => Self::Gone,
            0x4B => Self::LengthRequired,
            0x4C => Self::PreconditionFailed,
            0x4D => Self::RequestedEntityTooLarge,
            0x4E => Self::RequestedUrlTooLarge,
            0x4F => Self::UnsupportedMediaType,
            0x50 => Self::InternalServerError,
            0x51 => Self::NotImplemented,
            0x52 => Self::BadGateway,
            0x53 => Self::ServiceUnavailable,
            0x54 => Self::GatewayTimeout,
            0x55 => Self::HttpVersionNotSupported,
            0x60 => Self::DatabaseFull,
            0x61 => Self::DatabaseLocked,
            _ => return None,
        };
        Some(op)
    }

    /// Connect, Disconnect, SetPath, Session and Abort are single-packet
    /// requests and must always be sent with the final bit.
    pub const fn is_always_final(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Disconnect | Self::SetPath | Self::Session | Self::Abort
        )
    }

    pub const fn is_response(self) -> bool {
        !matches!(
            self,
            Self::Connect
                | Self::Disconnect
                | Self::Put
                | Self::Get
                | Self::SetPath
                | Self::Action
                | Self::Session
                | Self::Abort
        )
    }
}

/// A validated opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Opcode(u8);

impl Opcode {
    /// Build an opcode for `operation`.
    ///
    /// # Errors
    /// Returns [`ObexError::FinalBitRequired`] when `is_final` is false for one
    /// of the always-final requests.
    pub fn new(operation: Operation, is_final: bool) -> Result<Self> {
        if operation.is_always_final() && !is_final {
            return Err(ObexError::FinalBitRequired(operation));
        }
        Ok(Self::with_final_flag(operation, is_final))
    }

    /// The opcode of `operation` with the final bit set. Never fails.
    pub const fn final_of(operation: Operation) -> Self {
        Self::with_final_flag(operation, true)
    }

    const fn with_final_flag(operation: Operation, is_final: bool) -> Self {
        let raw = operation.raw();
        if is_final {
            Self(raw | FINAL_BIT)
        } else {
            Self(raw)
        }
    }

    /// Classify a raw byte read off the wire.
    ///
    /// # Errors
    /// Returns [`ObexError::InvalidOpcode`] for user-defined opcodes and for
    /// bytes that match no operation with or without the final bit.
    pub fn from_byte(raw: u8) -> Result<Self> {
        let opcode = Self(raw);
        if opcode.is_user_defined_range() {
            return Err(ObexError::InvalidOpcode(raw));
        }
        match opcode.operation() {
            Some(_) => Ok(opcode),
            None => Err(ObexError::InvalidOpcode(raw)),
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn is_final(self) -> bool {
        self.0 & FINAL_BIT != 0
    }

    /// The operation this byte selects, or None when neither the raw byte nor
    /// its low 7 bits are in the table.
    pub fn operation(self) -> Option<Operation> {
        Operation::from_raw(self.0).or_else(|| Operation::from_raw(self.0 & !FINAL_BIT))
    }

    pub fn is_user_defined_range(self) -> bool {
        USER_DEFINED_RANGE.contains(&self.0)
    }

    /// Shorthand for `self.operation() == Some(operation)`.
    pub fn is(self, operation: Operation) -> bool {
        self.operation() == Some(operation)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ObexError;

    fn try_from(raw: u8) -> Result<Self> {
        Self::from_byte(raw)
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> u8 {
        opcode.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation() {
            Some(op) => write!(f, "0x{:02X} ({op:?})", self.0),
            None => write!(f, "0x{:02X}", self.0),
        }
    }
}
