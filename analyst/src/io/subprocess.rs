//! Child-process execution backend used by the sandbox service.
//!
//! Each request runs in its own scratch directory under a shared run root.
//! Input data is not copied: the service reads it from `data_dir`, which the
//! deployment mounts alongside the run root.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::types::{ExecutionRequest, ExecutionResult, append_timeout_notice};
use crate::io::backend::{ExecutionBackend, join_sandbox_path};
use crate::io::collector::collect_artifacts;
use crate::io::process::run_command_with_timeout;
use crate::io::workspace::ScopedDir;

/// Script file name inside each scratch directory.
pub const JOB_SCRIPT: &str = "job.py";

#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    run_root: PathBuf,
    interpreter: Vec<String>,
    data_dir: String,
}

impl SubprocessBackend {
    pub fn new(run_root: impl Into<PathBuf>, interpreter: Vec<String>, data_dir: impl Into<String>) -> Self {
        Self {
            run_root: run_root.into(),
            interpreter,
            data_dir: data_dir.into(),
        }
    }

    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let (program, args) = self
            .interpreter
            .split_first()
            .context("interpreter command is empty")?;
        let scratch = ScopedDir::create(&self.run_root, "job-")?;
        let script = scratch.path().join(JOB_SCRIPT);
        std::fs::write(&script, &request.code)
            .with_context(|| format!("write {}", script.display()))?;
        if let Some(input) = &request.input_path {
            debug!(input = %input.display(), "input is read from the data directory, not copied");
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(JOB_SCRIPT)
            .current_dir(scratch.path())
            .env("MPLBACKEND", "Agg");
        let output = run_command_with_timeout(cmd, None, request.timeout)
            .with_context(|| format!("run {program}"))?;

        let mut stderr = output.stderr_lossy();
        if output.timed_out {
            warn!(scratch = %scratch.path().display(), "job timed out");
            append_timeout_notice(&mut stderr, request.timeout);
        }
        let collected = collect_artifacts(scratch.path());

        Ok(ExecutionResult {
            stdout: output.stdout_lossy(),
            stderr,
            exit_code: output.exit_code(),
            timed_out: output.timed_out,
            images: collected.images,
            tabular_text: collected.tabular_text,
            echoed_code: request.code.clone(),
        })
    }
}

impl ExecutionBackend for SubprocessBackend {
    fn sandbox_data_path(&self, file_name: &str) -> String {
        join_sandbox_path(&self.data_dir, file_name)
    }

    #[instrument(skip_all, fields(timeout_ms = request.timeout.as_millis() as u64))]
    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        match self.run(request) {
            Ok(result) => {
                debug!(exit_code = ?result.exit_code, images = result.images.len(), "job finished");
                result
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "job failed to run");
                ExecutionResult::infrastructure_failure(
                    &request.code,
                    format!("ExecutionError: {err:#}"),
                )
            }
        }
    }
}
