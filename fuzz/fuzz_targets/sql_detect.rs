#![no_main]

use fb_sql::{GeneratedKeysQueryBuilder, QuoteStrategy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        let _ = fb_sql::parse(sql);
        let builder = GeneratedKeysQueryBuilder::new(sql);
        let query = builder.for_all_columns();
        // A statement that already returns keys is passed through untouched.
        if builder.has_returning() {
            assert_eq!(query.sql(), sql);
        }
        let _ = builder.for_column_names(&["ID"], QuoteStrategy::for_dialect(3));
    }
});
