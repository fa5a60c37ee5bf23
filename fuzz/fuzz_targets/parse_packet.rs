#![no_main]

use cantor_engine::message::fuzz_parse_packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    fuzz_parse_packet(data);
});
