//! # Error Types
//!
//! Error handling for the OBEX engine.
//!
//! This module defines every error variant that can surface while encoding,
//! decoding or driving an OBEX session, from low-level I/O failures to peer
//! rejections and state-machine misuse.
//!
//! ## Error Categories
//! - **I/O Errors**: transport failures, always fatal to the session
//! - **Framing Errors**: invalid opcodes, malformed or truncated packets, quota overruns
//! - **Lookup Errors**: missing headers or application parameters
//! - **Session Errors**: peer rejections, connect/disconnect misuse, cancellation
//!
//! Everything except [`ObexError::Io`] and [`ObexError::ConnectionClosed`] is
//! scoped to the current operation: the session stays usable afterwards.
//!
//! ## Example Usage
//! ```rust
//! use obex_protocol::core::opcode::Opcode;
//! use obex_protocol::error::{ObexError, Result};
//!
//! fn classify(raw: u8) -> Result<Opcode> {
//!     Opcode::from_byte(raw)
//! }
//!
//! assert!(classify(0x82).is_ok());
//! assert!(matches!(classify(0x15), Err(ObexError::InvalidOpcode(0x15))));
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use crate::core::opcode::{Opcode, Operation};

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_LENGTH_BELOW_PREFIX: &str = "declared packet length is shorter than its prefix";
    pub const ERR_HEADER_LENGTH_BELOW_PREFIX: &str =
        "declared header length is shorter than its prefix";
    pub const ERR_HEADERS_DID_NOT_EXHAUST: &str =
        "header decoding did not consume the declared packet length";
    pub const ERR_MISSING_CONNECT_FIELDS: &str = "connect packet is missing its extra field";
    pub const ERR_FRAME_OVER_LIMIT: &str = "declared packet length exceeds the receive limit";

    /// Text errors
    pub const ERR_ODD_UTF16_LENGTH: &str = "UTF-16 payload has an odd number of bytes";
    pub const ERR_INVALID_UTF16: &str = "payload is not valid UTF-16";
    pub const ERR_INVALID_UTF8: &str = "payload is not valid UTF-8";
    pub const ERR_INVALID_ASCII: &str = "payload is not valid ASCII";

    /// Bounded reader
    pub const ERR_BOUNDED_LOAD: &str = "load";
    pub const ERR_BOUNDED_DETACH: &str = "detach";
}

/// ObexError is the primary error type for all engine operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ObexError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Invalid opcode: 0x{0:02X}")]
    InvalidOpcode(u8),

    #[error("Operation {0:?} must always carry the final bit")]
    FinalBitRequired(Operation),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Stream ended before the declared packet length was read")]
    TruncatedPacket,

    #[error("Read of {requested} bytes exceeds the remaining quota of {remaining} bytes")]
    QuotaExceeded { remaining: usize, requested: usize },

    #[error("Operation not allowed on a bounded reader: {0}")]
    DisallowedOnBoundedReader(String),

    #[error("Header 0x{0:02X} not found")]
    HeaderNotFound(u8),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),

    #[error("Invalid text: {0}")]
    InvalidText(String),

    #[error("Application parameter 0x{0:02X} not found")]
    AppParameterNotFound(u8),

    #[error("Truncated application parameter")]
    TruncatedAppParameter,

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Request failed with response {0}")]
    RequestFailed(Opcode),

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request handler failed: {0}")]
    Handler(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ObexError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPacket(reason.into())
    }

    pub fn handler(reason: impl ToString) -> Self {
        Self::Handler(reason.to_string())
    }

    /// Returns true if the error leaves the underlying stream unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::TruncatedPacket | Self::Handler(_)
        )
    }
}

/// Type alias for Results using ObexError
pub type Result<T> = std::result::Result<T, ObexError>;
