#![no_main]

use common::jwt::Audience;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(aud) = serde_json::from_slice::<Audience>(data) {
        for value in aud.values() {
            assert!(aud.contains(value));
        }
    }
});
