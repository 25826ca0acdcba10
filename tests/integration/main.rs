//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the client against a
//! scripted in-memory transport. No network is needed.

mod client_tests;
mod fanout_tests;
mod mock_transport;
