//! Generate/execute/evaluate control loop for `analyst run`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::sanitizer::sanitize;
use crate::core::session::AnalysisSession;
use crate::core::transition::{LoopState, Signals, Verdict, next_state};
use crate::core::types::{ExecutionRequest, ExecutionResult};
use crate::io::backend::ExecutionBackend;
use crate::io::config::AnalystConfig;
use crate::io::finalizer::finalize;
use crate::io::generator::{CodeGenerator, GenerationRequest};

/// Loop limits and output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub execution_timeout: Duration,
    pub output_dir: PathBuf,
}

impl LoopConfig {
    pub fn from_config(config: &AnalystConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            execution_timeout: config.execution_timeout(),
            output_dir: config.output_dir.clone(),
        }
    }
}

/// What to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTask {
    pub description: String,
    /// Host path of the input data artifact.
    pub input_path: PathBuf,
}

/// Reason why `run_analysis` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The last execution wrote nothing to stderr.
    Succeeded,
    /// Every allowed iteration ended with stderr output.
    BudgetExhausted { iterations: u32, max_iterations: u32 },
}

/// Summary of a finished analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub stop: LoopStop,
    pub iterations: u32,
    pub last_stdout: String,
    pub last_stderr: String,
    /// Files written by the finalizer.
    pub manifest: Vec<PathBuf>,
}

/// Progress notification sent after each execution.
#[derive(Debug)]
pub struct IterationReport<'a> {
    pub iteration: u32,
    pub max_iterations: u32,
    pub result: &'a ExecutionResult,
}

/// Drive the state machine until it finalizes.
///
/// Returns `Err` only when the generator fails or the output directory
/// cannot be created. Execution failures feed the next generate step and
/// never abort the loop. The finalizer runs exactly once on either
/// terminal verdict.
#[instrument(skip_all, fields(input = %task.input_path.display(), max_iterations = config.max_iterations))]
pub fn run_analysis<G, B, F>(
    task: &AnalysisTask,
    generator: &G,
    backend: &B,
    config: &LoopConfig,
    mut on_iteration: F,
) -> Result<LoopOutcome>
where
    G: CodeGenerator + ?Sized,
    B: ExecutionBackend + ?Sized,
    F: FnMut(&IterationReport<'_>),
{
    if config.max_iterations == 0 {
        bail!("max_iterations must be > 0");
    }
    let file_name = task
        .input_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("input path has no file name: {}", task.input_path.display()))?;
    let mut session = AnalysisSession::new(
        task.description.as_str(),
        task.input_path.clone(),
        backend.sandbox_data_path(&file_name),
    );
    info!(data_path = %session.sandbox_data_path, "starting analysis");

    let mut state = LoopState::Generate;
    loop {
        match state {
            LoopState::Generate => generate(&mut session, generator)?,
            LoopState::Execute => {
                let result = execute(&mut session, backend, config.execution_timeout);
                on_iteration(&IterationReport {
                    iteration: session.iteration,
                    max_iterations: config.max_iterations,
                    result: &result,
                });
            }
            LoopState::Evaluate => {}
            LoopState::Finalize(verdict) => {
                session.manifest = finalize(&session.artifacts, &config.output_dir)?;
                return Ok(outcome(session, verdict, config.max_iterations));
            }
        }
        let signals = Signals {
            has_error: session.has_error(),
            iteration: session.iteration,
            max_iterations: config.max_iterations,
        };
        let next = next_state(state, signals);
        debug!(from = ?state, to = ?next, "transition");
        state = next;
    }
}

fn generate<G: CodeGenerator + ?Sized>(session: &mut AnalysisSession, generator: &G) -> Result<()> {
    let feedback = session.feedback();
    let input_filename = session.input_filename();
    let request = GenerationRequest {
        task: &session.task,
        input_filename: &input_filename,
        data_path: &session.sandbox_data_path,
        feedback: feedback.as_ref(),
    };
    let attempt = session.iteration + 1;
    let code = generator
        .generate(&request)
        .with_context(|| format!("generate code (iteration {attempt})"))?;
    session.record_code(code);
    debug!(iteration = session.iteration, retry = feedback.is_some(), "generated code");
    Ok(())
}

fn execute<B: ExecutionBackend + ?Sized>(
    session: &mut AnalysisSession,
    backend: &B,
    timeout: Duration,
) -> ExecutionResult {
    let code = sanitize(&session.current_code, &session.sandbox_data_path);
    let request = ExecutionRequest {
        code,
        input_path: Some(session.input_path.clone()),
        timeout,
    };
    let result = backend.execute(&request);
    session.record_result(&result, &request.code);
    if result.has_error() {
        warn!(iteration = session.iteration, timed_out = result.timed_out, "execution reported errors");
    } else {
        info!(iteration = session.iteration, images = result.images.len(), "execution succeeded");
    }
    result
}

fn outcome(session: AnalysisSession, verdict: Verdict, max_iterations: u32) -> LoopOutcome {
    let stop = match verdict {
        Verdict::Succeeded => LoopStop::Succeeded,
        Verdict::BudgetExhausted => LoopStop::BudgetExhausted {
            iterations: session.iteration,
            max_iterations,
        },
    };
    LoopOutcome {
        stop,
        iterations: session.iteration,
        last_stdout: session.last_stdout,
        last_stderr: session.last_stderr,
        manifest: session.manifest,
    }
}
