//! Stable exit codes for analyst CLI commands.

/// Command succeeded; for `analyst run`, the final execution was clean.
pub const OK: i32 = 0;
/// Command failed due to invalid config, generator failure, or other errors.
pub const ERROR: i32 = 1;
/// `analyst run` used every iteration without a clean execution.
pub const BUDGET_EXHAUSTED: i32 = 2;
