//! Analyst configuration stored in `analyst.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "analyst.toml";

/// Which execution backend the control loop drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ephemeral container per execution.
    Container,
    /// Remote sandbox service over HTTP.
    Http,
}

/// Analyst configuration (TOML).
///
/// Missing fields default to the values below; CLI flags override file values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalystConfig {
    /// Maximum generate/execute cycles per task.
    pub max_iterations: u32,

    /// Wall-clock bound for a single execution in seconds.
    pub execution_timeout_secs: u64,

    /// Directory the finalizer writes artifacts into.
    pub output_dir: PathBuf,

    pub backend: BackendKind,

    pub container: ContainerConfig,
    pub http: HttpConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container CLI invocation prefix (e.g. `["docker"]` or `["podman"]`).
    pub runtime: Vec<String>,
    pub image: String,
    /// Mount point of the workspace inside the container.
    pub workdir: String,
    /// Interpreter invocation; the script name is appended.
    pub interpreter: Vec<String>,
    /// Value for `--network`.
    pub network: String,
    /// Host directory under which workspaces and staging directories are created.
    pub workspace_root: PathBuf,
    /// Value for `--memory`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Value for `--cpus`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: vec!["docker".to_string()],
            image: "my-python-agent".to_string(),
            workdir: "/workspace".to_string(),
            interpreter: vec!["python".to_string()],
            network: "none".to_string(),
            workspace_root: PathBuf::from("tmp_workspace"),
            memory: None,
            cpus: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// Sandbox service endpoint.
    pub url: String,
    /// Directory the service sees input data under.
    pub data_dir: String,
    /// Client-side bound on one request in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000/run".to_string(),
            data_dir: "/app/data".to_string(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads a prompt on stdin and prints code on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 300,
        }
    }
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            execution_timeout_secs: 30,
            output_dir: PathBuf::from("outputs"),
            backend: BackendKind::Container,
            container: ContainerConfig::default(),
            http: HttpConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl AnalystConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.execution_timeout_secs == 0 {
            return Err(anyhow!("execution_timeout_secs must be > 0"));
        }
        if is_blank_command(&self.container.runtime) {
            return Err(anyhow!("container.runtime must be a non-empty array"));
        }
        if is_blank_command(&self.container.interpreter) {
            return Err(anyhow!("container.interpreter must be a non-empty array"));
        }
        if self.container.image.trim().is_empty() {
            return Err(anyhow!("container.image must not be empty"));
        }
        if !self.container.workdir.starts_with('/') {
            return Err(anyhow!("container.workdir must be an absolute path"));
        }
        if self.http.url.trim().is_empty() {
            return Err(anyhow!("http.url must not be empty"));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(anyhow!("http.request_timeout_secs must be > 0"));
        }
        if is_blank_command(&self.generator.command) {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AnalystConfig::default()`.
pub fn load_config(path: &Path) -> Result<AnalystConfig> {
    if !path.exists() {
        let cfg = AnalystConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AnalystConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AnalystConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
