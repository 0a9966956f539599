#![no_main]

use libfuzzer_sys::fuzz_target;
use rivulet_core::Document;

fuzz_target!(|data: &[u8]| {
    let Ok(markup) = std::str::from_utf8(data) else {
        return;
    };
    let doc = Document::new();
    let host = doc.create_element("div");
    doc.set_inner_html(host, markup).expect("host is an element");
    let serialized = doc.inner_html(host);
    let copy = doc.create_element("div");
    doc.set_inner_html(copy, &serialized)
        .expect("copy is an element");

    // Freeing a parsed tree returns the arena to its previous size.
    let before = doc.node_count();
    let freed = doc.reclaim(host).expect("host is detached")
        + doc.reclaim(copy).expect("copy is detached");
    assert_eq!(doc.node_count(), before - freed);
    assert_eq!(doc.node_count(), 1);
});
