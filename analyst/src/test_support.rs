//! Test-only fakes for the generator and backend seams, plus filesystem fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::session::Feedback;
use crate::core::types::{ExecutionRequest, ExecutionResult};
use crate::io::backend::{ExecutionBackend, join_sandbox_path};
use crate::io::generator::{CodeGenerator, GenerationRequest};

/// One queued generator reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Code(String),
    Fail(String),
}

/// Owned copy of a [`GenerationRequest`] for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedGeneration {
    pub task: String,
    pub input_filename: String,
    pub data_path: String,
    pub feedback: Option<Feedback>,
}

/// Generator that replays queued replies, then repeats `fallback` if set.
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    requests: RefCell<Vec<RecordedGeneration>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            fallback: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Always returns `code`.
    pub fn repeating(code: &str) -> Self {
        Self::new(Vec::new()).with_fallback(ScriptedReply::Code(code.to_string()))
    }

    /// Always fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self::new(Vec::new()).with_fallback(ScriptedReply::Fail(message.to_string()))
    }

    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn requests(&self) -> Vec<RecordedGeneration> {
        self.requests.borrow().clone()
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        self.requests.borrow_mut().push(RecordedGeneration {
            task: request.task.to_string(),
            input_filename: request.input_filename.to_string(),
            data_path: request.data_path.to_string(),
            feedback: request.feedback.cloned(),
        });
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted generator has no replies left"))?;
        match reply {
            ScriptedReply::Code(code) => Ok(code),
            ScriptedReply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Backend that replays queued results, then repeats `fallback` if set.
pub struct ScriptedBackend {
    results: RefCell<VecDeque<ExecutionResult>>,
    fallback: Option<ExecutionResult>,
    requests: RefCell<Vec<ExecutionRequest>>,
    data_dir: String,
}

impl ScriptedBackend {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            fallback: None,
            requests: RefCell::new(Vec::new()),
            data_dir: "/workspace".to_string(),
        }
    }

    pub fn repeating(result: ExecutionResult) -> Self {
        Self::new(Vec::new()).with_fallback(result)
    }

    pub fn with_fallback(mut self, result: ExecutionResult) -> Self {
        self.fallback = Some(result);
        self
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.borrow().clone()
    }
}

impl ExecutionBackend for ScriptedBackend {
    fn sandbox_data_path(&self, file_name: &str) -> String {
        join_sandbox_path(&self.data_dir, file_name)
    }

    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.requests.borrow_mut().push(request.clone());
        self.results
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                ExecutionResult::infrastructure_failure(&request.code, "scripted backend has no results left")
            })
    }
}

/// Clean result with the given stdout.
pub fn ok_result(stdout: &str) -> ExecutionResult {
    ExecutionResult {
        stdout: stdout.to_string(),
        exit_code: Some(0),
        ..ExecutionResult::default()
    }
}

/// Failed result with the given stderr.
pub fn failed_result(stderr: &str) -> ExecutionResult {
    ExecutionResult {
        stderr: stderr.to_string(),
        exit_code: Some(1),
        ..ExecutionResult::default()
    }
}

/// PNG signature followed by a tag byte, distinct per `tag`.
pub fn fake_png(tag: u8) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.push(tag);
    bytes
}

/// Temporary directory holding one input file and an output location.
pub struct AnalysisFixture {
    temp: TempDir,
    input_path: PathBuf,
}

impl AnalysisFixture {
    pub fn new(file_name: &str, contents: &str) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let input_path = temp.path().join(file_name);
        fs::write(&input_path, contents)?;
        Ok(Self { temp, input_path })
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp.path().join("outputs")
    }
}
