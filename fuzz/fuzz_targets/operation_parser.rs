#![no_main]

use libfuzzer_sys::fuzz_target;
use mongolog_ingest::{LineOutcome, OperationParser, PipelineTags};

fuzz_target!(|data: &[u8]| {
    let parser = OperationParser::new(PipelineTags {
        project: "fuzz".to_string(),
        hostname: "fuzz".to_string(),
    });

    // Any outcome is fine; we only care about panics. Parsed points must
    // still render.
    if let LineOutcome::Parsed(point) = parser.parse(data) {
        let _ = point.to_line_protocol();
    }
});
