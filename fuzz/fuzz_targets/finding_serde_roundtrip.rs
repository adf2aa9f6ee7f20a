#![no_main]

use libfuzzer_sys::fuzz_target;
use sentinel_types::{Cache, Finding};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(finding) = serde_json::from_str::<Finding>(raw) {
        let encoded = serde_json::to_string(&finding).expect("Finding always serializes");
        let roundtripped: Finding =
            serde_json::from_str(&encoded).expect("re-parsing our own output must succeed");
        assert_eq!(finding, roundtripped);
    }

    if let Ok(cache) = serde_json::from_str::<Cache>(raw) {
        assert!(cache.version == 1 || cache.version == 2);
    }
});
