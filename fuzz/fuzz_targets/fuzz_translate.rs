#![no_main]
use docscan::filter::{FilterExpr, FilterTranslator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        // Filter trees in their JSON form; translation must not panic in either mode.
        if let Ok(filters) = serde_json::from_str::<Vec<FilterExpr>>(s) {
            let _ = FilterTranslator::new(false).translate_with_report(&filters);
            let _ = FilterTranslator::new(true).translate_with_report(&filters);
        }
    }
});
