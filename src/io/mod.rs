//! File and process plumbing shared by the library and the CLI.
//!
//! - Atomic JSON writes for knowledge and store files
//! - Exit codes derived from refinery and store errors

pub mod atomic;
pub mod exit_code;

pub use atomic::{JsonWriteError, write_json_atomic};
pub use exit_code::ExitCode;
