//! Fuzz target for the YAML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary input to `AppConfig::parse()`, which covers YAML
//! deserialization, defaults and validation (including regex compilation
//! of the repository patterns).

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = orgvault_config::AppConfig::parse(s);
    }
});
