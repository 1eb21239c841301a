//! # Sessions
//!
//! Client and server state machines that drive [`Packet`]s over a duplex
//! byte stream.
//!
//! ## Components
//! - **Client**: connect handshake, request/continuation loop, object push
//! - **Server**: connect handshake and request dispatch to a [`RequestHandler`]
//! - **Object**: a [`RequestHandler`] that assembles inbound PUT transfers
//!
//! Each session owns its stream exclusively and processes one request at a
//! time. Cancellation is cooperative through a
//! [`tokio_util::sync::CancellationToken`] handed to the session.
//!
//! [`Packet`]: crate::core::packet::Packet
//! [`RequestHandler`]: server::RequestHandler

use bytes::Bytes;
use std::fmt;

pub mod client;
pub mod object;
pub mod server;

/// The Target header value that selects a service on a Connect.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceId(Bytes);

impl ServiceId {
    /// Object Push connects without a Target header.
    pub const OBJECT_PUSH: Self = Self(Bytes::from_static(&[]));

    /// Message Access, `BB582B40-420C-11DB-B0DE-0800200C9A66`.
    pub const MESSAGE_ACCESS: Self = Self(Bytes::from_static(&[
        0xBB, 0x58, 0x2B, 0x40, 0x42, 0x0C, 0x11, 0xDB, 0xB0, 0xDE, 0x08, 0x00, 0x20, 0x0C, 0x9A,
        0x66,
    ]));

    /// Message Notification, `BB582B41-420C-11DB-B0DE-0800200C9A66`.
    pub const MESSAGE_NOTIFICATION: Self = Self(Bytes::from_static(&[
        0xBB, 0x58, 0x2B, 0x41, 0x42, 0x0C, 0x11, 0xDB, 0xB0, 0xDE, 0x08, 0x00, 0x20, 0x0C, 0x9A,
        0x66,
    ]));

    /// Phonebook Access, `796135F0-F0C5-11D8-0966-0800200C9A66`.
    pub const PHONEBOOK_ACCESS: Self = Self(Bytes::from_static(&[
        0x79, 0x61, 0x35, 0xF0, 0xF0, 0xC5, 0x11, 0xD8, 0x09, 0x66, 0x08, 0x00, 0x20, 0x0C, 0x9A,
        0x66,
    ]));

    pub fn new(id: impl Into<Bytes>) -> Self {
        Self(id.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a Connect carrying `target` addresses this service. A missing
    /// Target header only matches the empty id.
    pub fn matches(&self, target: Option<&[u8]>) -> bool {
        target.unwrap_or_default() == &self.0[..]
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() != 16 {
            return write!(f, "ServiceId({:02X?})", &self.0[..]);
        }
        let b = &self.0;
        write!(
            f,
            "ServiceId({:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X})",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15]
        )
    }
}

impl From<Bytes> for ServiceId {
    fn from(id: Bytes) -> Self {
        Self(id)
    }
}
