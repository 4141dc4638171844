//! Fuzz target: `LineSplitter` (serial framing)
//!
//! Feeds arbitrary bytes in arbitrary chunk sizes and checks:
//! - No panics, including on invalid UTF-8
//! - One line per `\r` in the input
//! - No returned line contains a terminator or surrounding whitespace
//!
//! cargo fuzz run fuzz_line_splitter

#![no_main]

use hottub::adapters::serial::LineSplitter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&cut, stream)) = data.split_first() else {
        return;
    };
    let cut = usize::from(cut).max(1);

    let mut splitter = LineSplitter::default();
    let mut lines = Vec::new();
    for chunk in stream.chunks(cut) {
        lines.extend(splitter.feed(chunk));
    }

    let terminators = stream.iter().filter(|&&b| b == b'\r').count();
    assert_eq!(lines.len(), terminators);
    for line in &lines {
        assert!(!line.contains('\r'));
        assert_eq!(line.trim(), line);
    }
});
