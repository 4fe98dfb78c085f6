#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(span) = depends::formats::detect_overlay(data) {
        assert!(span.slice(data).is_some());
    }
});
