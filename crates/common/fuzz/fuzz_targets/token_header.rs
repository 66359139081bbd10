#![no_main]

use common::jwt::{extract_header, MAX_JWT_SIZE_BYTES};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    // Header parsing runs on untrusted input and must never panic
    if let Ok(header) = extract_header(token) {
        assert!(token.len() <= MAX_JWT_SIZE_BYTES);
        assert!(!header.kid.is_empty());
        assert!(!header.alg.is_empty());
        assert_eq!(token.split('.').count(), 3);
    }
});
