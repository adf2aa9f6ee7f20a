#![no_main]

use libfuzzer_sys::fuzz_target;
use sentinel_config::SentinelFileConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Neither format's deserializer should panic on arbitrary text, valid
    // or not; malformed input must surface as an error.
    let _: Result<SentinelFileConfig, _> = serde_json::from_str(raw);
    let _: Result<SentinelFileConfig, _> = serde_yaml::from_str(raw);
});
