#![no_main]

use libfuzzer_sys::fuzz_target;
use termdex::index::SectionRegistry;

fuzz_target!(|data: &str| {
    // Malformed queries must come back as None, never as a panic
    let sections = SectionRegistry::default();
    if let Some(form) = termdex::query::parse_query(data, &sections) {
        let _ = form.to_string();
    }
});
