//! Deterministic, pure logic shared by the analysis engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod sanitizer;
pub mod session;
pub mod transition;
pub mod types;
