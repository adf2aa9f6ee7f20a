#![no_main]

use libfuzzer_sys::fuzz_target;
use sentinel_sanitize::mask;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // mask() must never panic, and masking must be idempotent: masking
    // already-masked output changes nothing further.
    let once = mask(input);
    let twice = mask(&once);
    assert_eq!(once, twice);
});
