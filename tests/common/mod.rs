// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;

pub const BINARY: &str = env!("CARGO_BIN_EXE_mongolog-ingest");

/// Run the binary with the given arguments and input via stdin
pub fn run_with_input(args: &[&str], input: &str) -> (String, String, i32) {
    let mut cmd = Command::new(BINARY)
        .args(args)
        .env_remove("RUST_LOG")
        .env("XDG_CONFIG_HOME", std::env::temp_dir().join("mongolog-ingest-tests"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start mongolog-ingest");

    if let Some(mut stdin) = cmd.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .expect("Failed to write to stdin");
    }

    let output = cmd.wait_with_output().expect("Failed to read output");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Run the binary against a temporary file holding `file_content`, passed as
/// the last argument
pub fn run_with_file(args: &[&str], file_content: &str) -> (String, String, i32) {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file
        .write_all(file_content.as_bytes())
        .expect("Failed to write to temp file");

    let mut full_args = args.to_vec();
    full_args.push(temp_file.path().to_str().unwrap());
    run_with_input(&full_args, "")
}

/// A 3.x layout command line with a given connection, namespace and duration
pub fn format_b_line(conn: u32, namespace: &str, keys: u32, millis: u32) -> String {
    format!(
        "2024-01-01T00:00:{:02}.000+0000 I COMMAND [conn{}] command {} command: find {{ find: \"foo\" }} planSummary: IXSCAN {{ a: 1 }} keysExamined:{} docsExamined:{} numYields:0 reslen:220 locks:{{ Global: {{ acquireCount: {{ r: 2 }} }} }} protocol:op_query {}ms\n",
        millis % 60,
        conn,
        namespace,
        keys,
        keys / 2,
        millis
    )
}

/// A 2.4 layout query line
pub fn format_a_line(conn: u32, namespace: &str, scanned: u32, millis: u32) -> String {
    format!(
        "2013-08-05T20:53:11.489 [conn{}] query {} query: {{ a: 1 }} ntoreturn:0 ntoskip:0 nscanned:{} keyUpdates:0 locks(micros) r:1234 nreturned:1 reslen:20 {}ms\n",
        conn, namespace, scanned, millis
    )
}

/// A realistic mixed log: operations of both layouts, startup noise and
/// non-operation candidates. Returns the text and the number of operation lines.
pub fn generate_log(operations: usize) -> (String, usize) {
    let mut log = String::new();
    log.push_str("2024-01-01T00:00:00.000+0000 I CONTROL  [initandlisten] MongoDB starting : pid=1 port=27017\n");
    log.push_str("\n");
    for i in 0..operations {
        let n = i as u32;
        if i % 2 == 0 {
            log.push_str(&format_b_line(n % 7, "shop.orders", n, n % 500 + 1));
        } else {
            log.push_str(&format_a_line(n % 5, "shop.users", n, n % 300 + 1));
        }
        if i % 10 == 0 {
            log.push_str("2024-01-01T00:00:00.000+0000 I NETWORK  [listener] connection accepted from 10.0.0.1:5000\n");
        }
        if i % 25 == 0 {
            log.push_str("2024-01-01T00:00:00.000+0000 I COMMAND  [conn3] killcursors shop.orders 1ms\n");
        }
    }
    (log, operations)
}
