#![no_main]

use libfuzzer_sys::fuzz_target;
use mongolog_ingest::worker_proc::FrameReader;

const MAX_ITEMS: usize = 1024;

fuzz_target!(|data: &[u8]| {
    for _ in FrameReader::new(data).take(MAX_ITEMS) {}
});
