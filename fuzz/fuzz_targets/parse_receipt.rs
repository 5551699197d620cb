#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(receipt) = serde_json::from_slice::<tfgate_types::ScenarioReceipt>(data) {
        let _ = tfgate_app::render_markdown(&receipt);
        for line in tfgate_app::github_annotations(&receipt) {
            assert!(!line.contains('\n'));
        }
    }
});
