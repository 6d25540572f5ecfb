#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes either parse or yield a format error
    if let Ok((record, layout)) = termdex::index::record::parse(data) {
        assert!(layout.live_entries() <= layout.stored_entries());
        let _ = termdex::index::record::to_bytes(&record);
    }
});
