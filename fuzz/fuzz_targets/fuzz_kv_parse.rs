//! Fuzz target for KeyValueText parsing.
//!
//! Arbitrary text must never panic, and whatever parses must survive a
//! serialize/parse round trip unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use steamshell::kv;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(tree) = kv::parse(text) {
        let again = kv::parse(&kv::serialize(&tree)).expect("serialized tree must parse");
        assert_eq!(tree, again);
    }
});
