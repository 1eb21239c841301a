#![no_main]

use libfuzzer_sys::fuzz_target;
use obex_protocol::core::bounded::BoundedReader;
use obex_protocol::HeaderSet;

fuzz_target!(|data: &[u8]| {
    // Header decoding with an arbitrary quota
    let Some((&quota, rest)) = data.split_first() else {
        return;
    };
    let mut src = rest;
    let mut reader = BoundedReader::new(&mut src, quota as usize);
    if let Ok(headers) = HeaderSet::decode(&mut reader) {
        for header in headers.iter() {
            let _ = header.as_text(true);
            let _ = header.as_app_parameters();
        }
    }
});
