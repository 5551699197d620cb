#![no_main]

use libfuzzer_sys::fuzz_target;
use tfgate_types::VarValue;

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = serde_json::from_slice::<VarValue>(data) {
        let rendered = value.render_hcl();
        // Only a top-level string is passed through raw.
        if !matches!(value, VarValue::String(_)) {
            assert!(!rendered.contains('\n'));
        }
    }
});
