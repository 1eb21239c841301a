#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use obex_protocol::{Packet, PacketLayout};

fuzz_target!(|data: &[u8]| {
    // Packet decoding must never panic, whatever the layout
    for layout in [
        PacketLayout::Request,
        PacketLayout::Response,
        PacketLayout::ConnectResponse,
    ] {
        if let Ok(packet) = Packet::decode(&mut Bytes::copy_from_slice(data), layout) {
            // Anything that decodes must re-encode
            let _ = packet.to_bytes();
            let _ = packet.name();
            let _ = packet.body_content();
        }
    }
});
