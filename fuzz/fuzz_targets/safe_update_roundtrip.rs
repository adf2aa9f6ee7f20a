#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let Ok(original) = std::str::from_utf8(data) else {
        return;
    };

    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };
    let tmp_dir = td.path().join("tmp");
    if fs::create_dir_all(&tmp_dir).is_err() {
        return;
    }
    let file = td.path().join("target.txt");
    if fs::write(&file, original).is_err() {
        return;
    }

    let result = sentinel_fsupdate::safe_update(&file, &tmp_dir, |s| format!("{s}-updated"));

    // Whatever the outcome, the file must hold either the full original
    // content or the full transformed content, never a partial write.
    let after = fs::read_to_string(&file).unwrap_or_default();
    match result {
        Ok(outcome) => {
            assert_eq!(after, format!("{original}-updated"));
            assert!(outcome.backup_path.exists());
            let backup = fs::read_to_string(&outcome.backup_path).unwrap_or_default();
            assert_eq!(backup, original);
        }
        Err(_) => {
            assert!(after == original || after == format!("{original}-updated"));
        }
    }
});
