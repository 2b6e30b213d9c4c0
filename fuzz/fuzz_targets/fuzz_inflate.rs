#![no_main]

use craftwire::core::legacy::LegacyPing;
use craftwire::utils::compression::decompress;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decompress(data, 1 << 20);
    let _ = LegacyPing::parse(data);
});
