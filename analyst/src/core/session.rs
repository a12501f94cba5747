//! Agent session state threaded through the control loop.

use std::path::PathBuf;

use crate::core::types::ExecutionResult;

/// Artifacts merged across iterations.
///
/// Images accumulate; everything else is latest-wins. Output from a failed
/// iteration stays until a later iteration overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedArtifacts {
    pub images: Vec<Vec<u8>>,
    /// Most recent non-empty result table.
    pub tabular_text: Option<String>,
    pub last_code: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl AccumulatedArtifacts {
    /// Fold one execution result into the accumulated state.
    ///
    /// `submitted_code` is recorded when the backend did not echo the code back.
    pub fn merge(&mut self, result: &ExecutionResult, submitted_code: &str) {
        self.images.extend(result.images.iter().cloned());
        if let Some(table) = result.tabular_text.as_ref().filter(|t| !t.is_empty()) {
            self.tabular_text = Some(table.clone());
        }
        let code = if result.echoed_code.is_empty() {
            submitted_code
        } else {
            result.echoed_code.as_str()
        };
        self.last_code = Some(code.to_string());
        self.stdout = result.stdout.clone();
        self.stderr = result.stderr.clone();
    }
}

/// Error context handed to the generator on a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub error: String,
    pub code: String,
}

/// Mutable record of one analysis task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSession {
    pub task: String,
    /// Host path of the input data artifact.
    pub input_path: PathBuf,
    /// Path under which executed code sees the input.
    pub sandbox_data_path: String,
    pub current_code: String,
    pub last_stdout: String,
    pub last_stderr: String,
    pub artifacts: AccumulatedArtifacts,
    /// Number of generate steps taken so far.
    pub iteration: u32,
    pub manifest: Vec<PathBuf>,
}

impl AnalysisSession {
    pub fn new(task: impl Into<String>, input_path: PathBuf, sandbox_data_path: String) -> Self {
        Self {
            task: task.into(),
            input_path,
            sandbox_data_path,
            current_code: String::new(),
            last_stdout: String::new(),
            last_stderr: String::new(),
            artifacts: AccumulatedArtifacts::default(),
            iteration: 0,
            manifest: Vec::new(),
        }
    }

    /// Input basename as the generator should refer to it.
    pub fn input_filename(&self) -> String {
        self.input_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Feedback for the next generate step; `None` before the first attempt
    /// or after a clean run.
    pub fn feedback(&self) -> Option<Feedback> {
        if self.iteration == 0 || !self.has_error() {
            return None;
        }
        Some(Feedback {
            error: self.last_stderr.clone(),
            code: self.current_code.clone(),
        })
    }

    pub fn record_code(&mut self, code: String) {
        self.current_code = code;
        self.iteration += 1;
    }

    pub fn record_result(&mut self, result: &ExecutionResult, submitted_code: &str) {
        self.last_stdout = result.stdout.clone();
        self.last_stderr = result.stderr.clone();
        self.artifacts.merge(result, submitted_code);
    }

    pub fn has_error(&self) -> bool {
        !self.last_stderr.trim().is_empty()
    }
}
