//! Ephemeral-container execution backend.
//!
//! Each execution gets a fresh workspace bind-mounted into a uniquely named
//! container. The container is force-removed and every directory deleted on
//! all exit paths, including spawn failures and timeouts.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::types::{ExecutionRequest, ExecutionResult, append_timeout_notice};
use crate::io::backend::{ExecutionBackend, join_sandbox_path};
use crate::io::collector::collect_artifacts;
use crate::io::config::ContainerConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::workspace::{ScopedDir, Workspace};

/// Script file name inside the workspace.
pub const SCRIPT_NAME: &str = "script.py";

const REMOVE_TIMEOUT: Duration = Duration::from_secs(30);
const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);
const PULL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Backend that runs each script in its own container.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    config: ContainerConfig,
}

impl ContainerBackend {
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    /// Make sure the image is available locally, pulling it if needed.
    #[instrument(skip_all, fields(image = %self.config.image))]
    pub fn prepare(&self) -> Result<()> {
        let mut inspect = runtime_command(&self.config.runtime)?;
        inspect.args(["image", "inspect", &self.config.image]);
        let output =
            run_command_with_timeout(inspect, None, INSPECT_TIMEOUT).context("inspect image")?;
        if !output.timed_out && output.status.success() {
            debug!("image present");
            return Ok(());
        }

        info!("image not found locally, pulling");
        let mut pull = runtime_command(&self.config.runtime)?;
        pull.args(["pull", &self.config.image]);
        let output = run_command_with_timeout(pull, None, PULL_TIMEOUT).context("pull image")?;
        if output.timed_out {
            bail!("pull {} timed out", self.config.image);
        }
        if !output.status.success() {
            bail!(
                "pull {} failed: {}",
                self.config.image,
                output.stderr_lossy().trim()
            );
        }
        Ok(())
    }

    /// Arguments after the runtime prefix for launching one execution.
    pub fn run_args(&self, name: &str, workspace: &Path) -> Vec<String> {
        let workdir = &self.config.workdir;
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network".to_string(),
            self.config.network.clone(),
            "-v".to_string(),
            format!("{}:{workdir}:rw", workspace.display()),
            "-w".to_string(),
            workdir.clone(),
            "-e".to_string(),
            "MPLBACKEND=Agg".to_string(),
        ];
        if let Some(memory) = &self.config.memory {
            args.push(format!("--memory={memory}"));
        }
        if let Some(cpus) = &self.config.cpus {
            args.push(format!("--cpus={cpus}"));
        }
        args.push(self.config.image.clone());
        args.extend(self.config.interpreter.iter().cloned());
        args.push(SCRIPT_NAME.to_string());
        args
    }

    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let root = &self.config.workspace_root;
        let mut workspace = Workspace::create(root, SCRIPT_NAME)?;
        let staging = ScopedDir::create(root, "out-")?;
        if let Some(input) = &request.input_path {
            workspace.copy_input(input)?;
        }
        workspace.write_script(&request.code)?;

        let container = ContainerGuard {
            runtime: self.config.runtime.clone(),
            name: format!("analyst-{}", Uuid::new_v4().simple()),
        };
        let mut cmd = runtime_command(&self.config.runtime)?;
        cmd.args(self.run_args(&container.name, workspace.path()));

        info!(container = %container.name, workspace = %workspace.path().display(), "launching container");
        let output =
            run_command_with_timeout(cmd, None, request.timeout).context("run container")?;

        let mut stderr = output.stderr_lossy();
        if output.timed_out {
            warn!(container = %container.name, "execution timed out");
            append_timeout_notice(&mut stderr, request.timeout);
        }

        // Nothing may still be writing into the workspace while it is harvested.
        drop(container);

        if let Err(err) = workspace.harvest_into(staging.path()) {
            warn!(err = %format!("{err:#}"), "failed to harvest workspace");
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("ArtifactError: {err:#}\n"));
        }
        let collected = collect_artifacts(staging.path());

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

impl ExecutionBackend for ContainerBackend {
    fn sandbox_data_path(&self, file_name: &str) -> String {
        join_sandbox_path(&self.config.workdir, file_name)
    }

    #[instrument(skip_all, fields(image = %self.config.image, timeout_ms = request.timeout.as_millis() as u64))]
    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        match self.run(request) {
            Ok(result) => {
                debug!(exit_code = ?result.exit_code, images = result.images.len(), "container execution finished");
                result
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "container execution failed");
                ExecutionResult::infrastructure_failure(
                    &request.code,
                    format!("ContainerError: {err:#}"),
                )
            }
        }
    }
}

/// Force-removes the named container when dropped.
struct ContainerGuard {
    runtime: Vec<String>,
    name: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Ok(mut cmd) = runtime_command(&self.runtime) else {
            return;
        };
        cmd.args(["rm", "-f", &self.name]);
        match run_command_with_timeout(cmd, None, REMOVE_TIMEOUT) {
            Ok(output) if output.timed_out => {
                warn!(container = %self.name, "container removal timed out");
            }
            Ok(output) if output.status.success() => {
                debug!(container = %self.name, "removed container");
            }
            Ok(output) => {
                // Expected when the container was never created.
                debug!(container = %self.name, stderr = %output.stderr_lossy().trim(), "container removal reported failure");
            }
            Err(err) => {
                debug!(container = %self.name, err = %format!("{err:#}"), "container runtime unavailable for removal");
            }
        }
    }
}

fn runtime_command(runtime: &[String]) -> Result<Command> {
    let (program, args) = runtime
        .split_first()
        .ok_or_else(|| anyhow!("container runtime command is empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}
