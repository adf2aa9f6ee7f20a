#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let path = td.path().join("cache.json");
    if fs::write(&path, data).is_err() {
        return;
    }

    // load() must never panic on arbitrary input; it falls back to an
    // empty v2 cache and quarantines anything it can't parse or validate.
    let cache = sentinel_cache::load(&path);
    assert!(cache.version == 1 || cache.version == 2);
});
