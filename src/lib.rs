//! # obex-protocol
//!
//! Async OBEX (Object Exchange) protocol engine.
//!
//! OBEX is the binary session protocol behind Bluetooth Object Push, Message
//! Access and Phonebook Access. This crate covers the protocol itself: packet
//! and header encoding, application parameters, and the client and server
//! session state machines. Establishing the transport and interpreting
//! profile payloads are left to the caller.
//!
//! ## Modules
//! - [`core`]: opcodes, headers, packets, codec
//! - [`session`]: client and server sessions, inbound object assembly
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: logging setup and metrics
//!
//! ## Example
//! ```no_run
//! use obex_protocol::config::ClientConfig;
//! use obex_protocol::core::header::Header;
//! use obex_protocol::core::opcode::Operation;
//! use obex_protocol::core::packet::Packet;
//! use obex_protocol::session::client::ObexClient;
//! use obex_protocol::session::ServiceId;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> obex_protocol::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:6500").await?;
//! let mut client = ObexClient::basic(stream, ClientConfig::default(), CancellationToken::new());
//! client.connect(&ServiceId::MESSAGE_ACCESS).await?;
//!
//! let request = Packet::request(Operation::Get, true)?
//!     .with_header(Header::mime_type("x-obex/folder-listing"));
//! let listing = client.run_request(request).await?;
//! println!("{}", listing.body_content_as_utf8(true)?);
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod utils;

pub use crate::core::header::{Header, HeaderId, HeaderSet};
pub use crate::core::opcode::{Opcode, Operation};
pub use crate::core::packet::{Packet, PacketLayout};
pub use crate::error::{ObexError, Result};
