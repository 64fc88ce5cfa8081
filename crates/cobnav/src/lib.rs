// lib.rs - Library surface for the cobnav binary and integration tests.
//
// The binary in main.rs only parses arguments and starts the server from
// `backend`.

pub mod backend;
pub mod declaration;
pub mod expander_subprocess;
pub mod perf;
pub mod reserved_words;
