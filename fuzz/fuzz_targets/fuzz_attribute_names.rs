#![no_main]

use libfuzzer_sys::fuzz_target;
use rivulet_core::Attribute;
use rivulet_runtime::attribute;
use rivulet_runtime::modifiers::{Kind, Modifiers, Schema, camel_case};

const SCHEMA: Schema = &[
    ("camel", Kind::Flag),
    ("once", Kind::Flag),
    ("wait", Kind::Numeric),
];

fuzz_target!(|input: (String, String, String)| {
    let (name, value, prefix) = input;
    if prefix.is_empty() {
        return;
    }
    let attributes = [Attribute::new(name.as_str(), value.as_str())];
    let kept = attribute::filter(&attributes, &prefix);
    for instruction in attribute::parse(&kept, &prefix) {
        assert!(!instruction.name.is_empty());
        let _ = Modifiers::parse(&instruction.modifiers, SCHEMA);
        if let Some(argument) = &instruction.argument {
            let _ = camel_case(argument);
        }
    }
});
