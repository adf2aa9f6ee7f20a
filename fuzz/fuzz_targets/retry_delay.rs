#![no_main]

use libfuzzer_sys::fuzz_target;
use sentinel_retry::{calculate_delay, is_transient, RetryConfig};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let attempt = (data[0] as u32 % 64) + 1;

    let config = RetryConfig::default();
    let delay = calculate_delay(&config, attempt);
    assert!(delay <= config.max_delay);

    if let Ok(tag) = std::str::from_utf8(&data[1..]) {
        // classification must never panic on arbitrary tag strings.
        let _ = is_transient(tag);
    }
});
