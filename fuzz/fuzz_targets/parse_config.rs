#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    // Parse as TOML config - only attempt if valid UTF-8
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(file) = tfgate_config::parse_config_str(Path::new("fuzz.toml"), s) {
            let _ = tfgate_config::resolve_scenario(&file, None);
        }
    }
});
