#![no_main]

use libfuzzer_sys::fuzz_target;
use sentinel_entropy::{scan_line, shannon_entropy, EntropyConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    let _ = shannon_entropy(line);

    let config = EntropyConfig::default();
    let candidates = scan_line(line, &config);

    // Every reported candidate must meet the configured thresholds and
    // fall within the line's byte range.
    for candidate in &candidates {
        assert!(candidate.token.len() >= config.min_length);
        assert!(candidate.entropy >= config.threshold);
        assert!(candidate.start <= line.len());
    }
});
