//! Fuzz target for the `.env` loader and `${VAR}` resolution.
//!
//! Run with: cargo +nightly fuzz run fuzz_env_file

#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use orgvault_core::Environment;

fuzz_target!(|data: &[u8]| {
    let mut env = Environment::isolated();
    if env.load_env_reader(data, Path::new("fuzz.env")).is_err() {
        return;
    }
    for name in env.names() {
        let _ = env.resolve(&format!("${{{name}}}"));
    }
});
