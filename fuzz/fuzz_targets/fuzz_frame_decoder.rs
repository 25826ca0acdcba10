//! Fuzz target: `FrameDecoder::next_frame`
//!
//! Drives arbitrary byte sequences into the streaming ZMTP decoder and
//! asserts that it never panics, never yields a body larger than
//! `MAX_FRAME_SIZE`, and never consumes more than it was fed.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use punchcard::rpc::codec::{FrameDecoder, MAX_FRAME_SIZE};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    // Split in two so partial headers are exercised too.
    let mid = data.len() / 2;
    decoder.feed(&data[..mid]);
    let mut consumed = 0;
    while let Ok(Some(frame)) = decoder.next_frame() {
        assert!(frame.body.len() <= MAX_FRAME_SIZE);
        consumed += frame.body.len();
    }
    decoder.feed(&data[mid..]);
    while let Ok(Some(frame)) = decoder.next_frame() {
        assert!(frame.body.len() <= MAX_FRAME_SIZE);
        consumed += frame.body.len();
    }
    assert!(consumed + decoder.buffered() <= data.len());

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    assert_eq!(decoder.buffered(), 0);
    decoder.feed(data);
    let _ = decoder.next_frame();
});
