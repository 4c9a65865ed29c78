#![no_main]

use bytes::BytesMut;
use fb_wire::{EventFrameDecoder, event::parse_event_buffer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|chunks: Vec<Vec<u8>>| {
    // Feed the input in arbitrary pieces to exercise partial-frame handling.
    let mut decoder = EventFrameDecoder::new();
    let mut buf = BytesMut::new();
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
    let _ = parse_event_buffer(&buf);
});
