//! Execution backend abstraction.
//!
//! The [`ExecutionBackend`] trait decouples the control loop from how code is
//! isolated. Tests use scripted backends that return predetermined results
//! without spawning processes.

use crate::core::types::{ExecutionRequest, ExecutionResult};

/// Runs code in isolation and reports a structured result.
pub trait ExecutionBackend {
    /// Path under which executed code sees an input file named `file_name`.
    fn sandbox_data_path(&self, file_name: &str) -> String;

    /// Execute `request`, blocking until it finishes or times out.
    ///
    /// Infallible by contract: infrastructure errors come back as a result
    /// with empty stdout and a descriptive stderr.
    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult;
}

impl<B: ExecutionBackend + ?Sized> ExecutionBackend for Box<B> {
    fn sandbox_data_path(&self, file_name: &str) -> String {
        (**self).sandbox_data_path(file_name)
    }

    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        (**self).execute(request)
    }
}

/// Join a sandbox directory and a file name with exactly one separator.
pub fn join_sandbox_path(dir: &str, file_name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), file_name)
}
