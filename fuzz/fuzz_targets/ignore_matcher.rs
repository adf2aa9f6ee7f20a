#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use sentinel_ignore::IgnoreMatcher;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let Ok(patterns_raw) = std::str::from_utf8(data) else {
        return;
    };

    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    // Feed fuzzer-controlled lines in as a .gitignore body; building and
    // matching against it must never panic, whether or not it parses.
    if std::fs::write(td.path().join(".gitignore"), patterns_raw).is_err() {
        return;
    }

    if let Ok(matcher) = IgnoreMatcher::build(td.path(), &[]) {
        let _ = matcher.decide(Path::new("some/arbitrary/path.txt"), false);
        let _ = matcher.decide(Path::new("some/arbitrary/dir"), true);
    }
});
