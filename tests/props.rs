//! Property-based tests for the demultiplexer and the KeyValueText format.

use proptest::prelude::*;
use std::sync::Arc;
use steamshell::kv::{self, KeyValueTree, Value};
use steamshell::{LineDemux, SteamCmd};

#[derive(Debug, Clone)]
enum Piece {
    /// A newline-terminated line of output.
    Text(String),
    /// The prompt, printed without a newline.
    Prompt,
}

fn piece() -> impl Strategy<Value = Piece> {
    prop_oneof![
        3 => "[a-zA-Z0-9 .,()/-]{0,24}".prop_map(Piece::Text),
        1 => Just(Piece::Prompt),
    ]
}

fn render(pieces: &[Piece]) -> Vec<u8> {
    let mut out = Vec::new();
    for piece in pieces {
        match piece {
            Piece::Text(text) => {
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Piece::Prompt => out.extend_from_slice(b"Steam>"),
        }
    }
    out
}

fn demux() -> LineDemux {
    LineDemux::new(Arc::new(SteamCmd))
}

fn tree(depth: u32) -> BoxedStrategy<KeyValueTree> {
    let key = "[a-zA-Z0-9 _\"\\\\/{}]{0,8}";
    let leaf = "[a-zA-Z0-9 _\"\\\\/{}\t\n]{0,12}".prop_map(Value::String);
    let value = if depth == 0 {
        leaf.boxed()
    } else {
        prop_oneof![3 => leaf, 1 => tree(depth - 1).prop_map(Value::Tree)].boxed()
    };
    prop::collection::btree_map(key, value, 0..5)
        .prop_map(|entries| {
            let mut tree = KeyValueTree::new();
            for (k, v) in entries {
                tree.insert(k, v);
            }
            tree
        })
        .boxed()
}

proptest! {
    #[test]
    fn test_demux_is_chunking_invariant(
        pieces in prop::collection::vec(piece(), 0..20),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let bytes = render(&pieces);
        let whole = demux().push(&bytes);

        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
        points.sort_unstable();
        let mut d = demux();
        let mut split = Vec::new();
        let mut start = 0;
        for point in points.into_iter().chain(std::iter::once(bytes.len())) {
            split.extend(d.push(&bytes[start..point]));
            start = point;
        }

        prop_assert_eq!(whole, split);
    }

    #[test]
    fn test_demux_emits_every_plain_line(lines in prop::collection::vec("[a-z0-9 ]{0,16}", 0..20)) {
        let pieces: Vec<Piece> = lines.iter().cloned().map(Piece::Text).collect();
        let bytes = render(&pieces);
        let mut d = demux();
        let emitted: Vec<String> = bytes.iter().flat_map(|b| d.push(&[*b])).map(|l| l.text).collect();
        let expected: Vec<String> = lines.iter().map(|l| l.trim_end().to_string()).collect();
        prop_assert_eq!(emitted, expected);
    }

    #[test]
    fn test_kv_round_trip(tree in tree(3)) {
        let text = kv::serialize(&tree);
        let parsed = kv::parse(&text);
        prop_assert_eq!(parsed.ok(), Some(tree));
    }

    #[test]
    fn test_kv_parse_never_panics(s in "\\PC*") {
        let _ = kv::parse(&s);
    }
}
