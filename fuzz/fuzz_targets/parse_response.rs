#![no_main]

use fb_wire::{ServerMessage, StatusOutcome, info};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    while !cursor.is_empty() {
        match ServerMessage::decode(&mut cursor) {
            Ok(ServerMessage::Response(response)) => {
                // Classification must never panic on arbitrary status vectors.
                let _ = matches!(response.status.classify(), StatusOutcome::Error(_));
                let _ = info::parse_info(&response.data);
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
});
