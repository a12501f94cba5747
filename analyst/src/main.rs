//! Data-analysis agent CLI.
//!
//! Generates Python for a task over an input file, runs it in a sandbox, and
//! retries with the error until the script runs clean or the iteration budget
//! is spent. Final code, table, and plots land in the output directory.

use std::fs;
use std::path::{Path, PathBuf};

use analyst::core::sanitizer::sanitize;
use analyst::exit_codes;
use analyst::io::backend::ExecutionBackend;
use analyst::io::config::{AnalystConfig, BackendKind, DEFAULT_CONFIG_FILE, load_config, write_config};
use analyst::io::container::ContainerBackend;
use analyst::io::generator::CommandGenerator;
use analyst::io::remote::HttpBackend;
use analyst::logging;
use analyst::looping::{AnalysisTask, IterationReport, LoopConfig, LoopStop, run_analysis};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "analyst",
    version,
    about = "Sandboxed data-analysis agent with a bounded retry loop"
)]
struct Cli {
    /// Config file; missing means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file populated with the defaults.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the generate/execute loop for one task.
    Run(RunArgs),
    /// Print generated code as it would be executed.
    Sanitize {
        /// File containing the code to rewrite.
        #[arg(long)]
        file: PathBuf,
        /// Path the input data is visible under inside the sandbox.
        #[arg(long)]
        data_path: String,
    },
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
struct RunArgs {
    /// Input data file.
    #[arg(long)]
    file: PathBuf,
    /// What to analyze, in natural language.
    #[arg(long)]
    task: String,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Per-execution timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl RunArgs {
    fn apply_overrides(&self, config: &mut AnalystConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = max;
        }
        if let Some(secs) = self.timeout_secs {
            config.execution_timeout_secs = secs;
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run(args) => cmd_run(&cli.config, &args),
        Command::Sanitize { file, data_path } => cmd_sanitize(&file, &data_path),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &AnalystConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config_path: &Path, args: &RunArgs) -> Result<i32> {
    let mut config = load_config(config_path)?;
    args.apply_overrides(&mut config);
    config.validate()?;

    let input_path = fs::canonicalize(&args.file)
        .with_context(|| format!("resolve input {}", args.file.display()))?;
    if !input_path.is_file() {
        bail!("input {} is not a file", input_path.display());
    }
    let task = AnalysisTask {
        description: args.task.clone(),
        input_path,
    };

    let generator = CommandGenerator::new(&config.generator);
    let backend = build_backend(&config)?;
    let outcome = run_analysis(
        &task,
        &generator,
        backend.as_ref(),
        &LoopConfig::from_config(&config),
        print_iteration,
    )?;

    if !outcome.last_stdout.trim().is_empty() {
        println!("--- output ---");
        println!("{}", outcome.last_stdout.trim_end());
    }
    println!("--- files ---");
    for path in &outcome.manifest {
        println!("{}", path.display());
    }

    match outcome.stop {
        LoopStop::Succeeded => {
            println!("analysis succeeded after {} iteration(s)", outcome.iterations);
            Ok(exit_codes::OK)
        }
        LoopStop::BudgetExhausted {
            iterations,
            max_iterations,
        } => {
            eprintln!("{}", outcome.last_stderr.trim_end());
            println!("iteration budget exhausted ({iterations}/{max_iterations}); last error is on stderr");
            Ok(exit_codes::BUDGET_EXHAUSTED)
        }
    }
}

fn build_backend(config: &AnalystConfig) -> Result<Box<dyn ExecutionBackend>> {
    match config.backend {
        BackendKind::Container => {
            let backend = ContainerBackend::new(config.container.clone());
            if let Err(err) = backend.prepare() {
                warn!(err = %format!("{err:#}"), "image preparation failed; executions will report the cause");
            }
            Ok(Box::new(backend))
        }
        BackendKind::Http => Ok(Box::new(HttpBackend::new(&config.http)?)),
    }
}

fn print_iteration(report: &IterationReport<'_>) {
    let status = if report.result.timed_out {
        "timed out"
    } else if report.result.has_error() {
        "failed"
    } else {
        "ok"
    };
    println!(
        "iteration {}/{}: {status}",
        report.iteration, report.max_iterations
    );
    if let Some(line) = report.result.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        println!("  {}", line.trim());
    }
}

fn cmd_sanitize(file: &Path, data_path: &str) -> Result<i32> {
    let code = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    print!("{}", sanitize(&code, data_path));
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["analyst", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "analyst",
            "run",
            "--file",
            "sales.csv",
            "--task",
            "plot sales",
            "--backend",
            "http",
            "--max-iterations",
            "3",
            "--config",
            "custom.toml",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(args.backend, Some(BackendKind::Http));
        assert_eq!(args.max_iterations, Some(3));
        assert_eq!(args.timeout_secs, None);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut config = AnalystConfig::default();
        let args = RunArgs {
            timeout_secs: Some(90),
            output_dir: Some(PathBuf::from("out")),
            ..RunArgs::default()
        };
        args.apply_overrides(&mut config);
        assert_eq!(config.execution_timeout_secs, 90);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.backend, BackendKind::Container);
    }

    #[test]
    fn run_requires_file_and_task() {
        assert!(Cli::try_parse_from(["analyst", "run", "--task", "x"]).is_err());
        assert!(Cli::try_parse_from(["analyst", "run", "--file", "x.csv"]).is_err());
    }
}
