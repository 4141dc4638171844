//! Fuzz target: config file decoding and validation
//!
//! Arbitrary JSON goes through the same path as `JsonConfigFile::load`.
//! Whatever validates must survive a save/load cycle and still validate.
//!
//! cargo fuzz run fuzz_config

#![no_main]

use hottub::config::SystemConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<SystemConfig>(data) else {
        return;
    };
    if config.validate().is_err() {
        return;
    }
    let text = serde_json::to_string(&config).expect("serialises");
    let again: SystemConfig = serde_json::from_str(&text).expect("own output parses");
    assert_eq!(again.validate(), Ok(()));
});
