#![no_main]
use docscan::FindRequest;
use docscan::memory::MemoryStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    // Arbitrary query documents against a small collection; errors are fine, panics are not.
    let Ok(filter) = serde_json::from_str::<bson::Document>(s) else {
        return;
    };
    let store = MemoryStore::new();
    store.insert_many(
        "db",
        "c",
        [
            bson::doc! { "_id": 1, "a": 1, "s": "abc", "n": { "x": [1, 2] } },
            bson::doc! { "_id": 2, "a": "1", "s": bson::Bson::Null },
            bson::doc! { "_id": 3 },
        ],
    );
    let request = FindRequest {
        database: "db".into(),
        collection: "c".into(),
        filter,
        projection: bson::Document::new(),
        min: None,
        max: None,
        batch_size: 2,
    };
    let _ = store.find(&request);
});
