//! Fuzz target: `parse_ready`
//!
//! Arbitrary READY command bodies must parse or be rejected, never panic.
//!
//! cargo fuzz run fuzz_ready_command

#![no_main]

use libfuzzer_sys::fuzz_target;
use punchcard::rpc::codec::parse_ready;

fuzz_target!(|data: &[u8]| {
    let _ = parse_ready(data);
});
