#![no_main]

use libfuzzer_sys::fuzz_target;
use sentinel_audit::VerifyOptions;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let path = td.path().join("audit.ndjson");
    if std::fs::write(&path, data).is_err() {
        return;
    }

    // verify_file must never panic on arbitrary NDJSON; malformed lines
    // are reported as errors, not raised.
    let _ = sentinel_audit::verify_file(&path, &VerifyOptions::default());
});
