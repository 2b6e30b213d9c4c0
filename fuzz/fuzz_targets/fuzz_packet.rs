#![no_main]

use bytes::Bytes;
use craftwire::protocol::{ConnectionState, PacketRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(registry) = PacketRegistry::bundled() else {
        return;
    };
    // First byte picks the protocol version, the rest is id plus body
    let Some((&selector, frame)) = data.split_first() else {
        return;
    };
    let version = 47 + i32::from(selector) * 293 / 255;
    for state in ConnectionState::ALL {
        let _ = registry.decode_serverbound(state, version, Bytes::copy_from_slice(frame));
    }
});
