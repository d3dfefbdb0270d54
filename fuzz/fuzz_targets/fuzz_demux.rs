//! Fuzz target for the line demultiplexer.
//!
//! Feeds raw PTY bytes split at fuzzer-chosen points, then checks that line
//! classification and dialect parsing cope with whatever comes out.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use steamshell::{Dialect, LineDemux, SteamCmd};

#[derive(Debug, Arbitrary)]
struct Input {
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let mut demux = LineDemux::new(Arc::new(SteamCmd));
    let mut lines = Vec::new();
    for chunk in &input.chunks {
        lines.extend(demux.push(chunk).into_iter().map(|l| l.text));
    }

    let dialect = SteamCmd;
    let _ = dialect.login_status(&lines);
    let _ = dialect.installed_apps(&lines);
    let _ = dialect.licensed_apps(&lines);
    let _ = dialect.app_info(&lines);
    let _ = dialect.app_status(&lines);
    for line in &lines {
        let _ = dialect.progress(line);
    }
});
