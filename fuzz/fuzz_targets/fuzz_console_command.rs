//! Fuzz target: console command parsing
//!
//! Any stdin line must parse to a command, an error, or nothing.  Never a
//! panic.  Accepted dispense commands are checked again by the controller,
//! so only the shape is asserted here.
//!
//! cargo fuzz run fuzz_console_command

#![no_main]

use hottub::adapters::console::parse_line;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };
    if let Some(parsed) = parse_line(line) {
        let trimmed = line.trim();
        assert!(!trimmed.is_empty() && !trimmed.starts_with('#'));
        if let Err(message) = parsed {
            assert!(!message.is_empty());
        }
    }
});
