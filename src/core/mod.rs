//! # Core Protocol Components
//!
//! Opcodes, headers, packets and the stream codec.
//!
//! ## Components
//! - **Opcode**: operation byte with the final bit
//! - **Header**: the four header encodings and the per-packet header set
//! - **App Params**: tag/length/value triplets inside Application-Parameters
//! - **Bounded**: quota-enforcing reader used while parsing a packet
//! - **Packet**: framing of one request or response
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Opcode(1)] [Length(2)] [ConnectParams(4)]? [Header]...
//! ```
//!
//! ## Security
//! - Declared lengths are checked against the receive limit before buffering
//! - Every read inside a packet is bounded by the packet's declared length

pub mod app_params;
pub mod bounded;
pub mod codec;
pub mod header;
pub mod opcode;
pub mod packet;
