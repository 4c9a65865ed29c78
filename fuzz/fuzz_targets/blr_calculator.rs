#![no_main]

use arbitrary::Arbitrary;
use fb_wire::{BlrCalculator, FieldDescriptor, RowDescriptor};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Column {
    type_tag: i32,
    sub_type: i32,
    scale: i32,
    length: i32,
}

#[derive(Debug, Arbitrary)]
struct Input {
    dialect: u8,
    columns: Vec<Column>,
}

fuzz_target!(|input: Input| {
    let mut builder = RowDescriptor::builder();
    for c in &input.columns {
        builder = builder.field(FieldDescriptor::new(c.type_tag, c.sub_type, c.scale, c.length));
    }
    let row = builder.build();
    let calculator = BlrCalculator::new(input.dialect);

    if let Ok(blr) = calculator.calculate_blr(&row) {
        // Every accepted column also has an io length.
        for field in row.iter() {
            assert!(calculator.io_length(field).is_ok());
        }
        assert!(blr.len() >= 8);
    }
});
