#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(pe) = depends::PeFile::from_bytes(data.to_vec()) else {
        return;
    };
    let options = depends::ParseOptions {
        max_libraries: 256,
        max_imports_per_library: 1024,
        max_exports: 4096,
        ..Default::default()
    };
    let _ = pe.function_table(&options);
    let _ = pe.overlay_span();
});
