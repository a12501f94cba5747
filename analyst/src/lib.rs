//! Sandboxed execution engine and retry loop for generated data-analysis code.
//!
//! A generator writes a Python script for a task, the engine runs it in an
//! isolated environment, and stderr drives another attempt until the script
//! runs clean or the iteration budget runs out. The crate keeps a strict
//! split:
//!
//! - **[`core`]**: Pure, deterministic logic (sanitizer rules, loop
//!   transitions, artifact merging, wire types). No I/O.
//! - **[`io`]**: Side-effecting operations (child processes, containers,
//!   HTTP, scratch directories, persistence). Behind traits so tests can
//!   swap in scripted fakes.
//!
//! [`looping`] ties the two together for `analyst run`.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
