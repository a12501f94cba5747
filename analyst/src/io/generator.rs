//! Code generator abstraction.
//!
//! The [`CodeGenerator`] trait decouples the control loop from the model that
//! writes the analysis code. [`CommandGenerator`] pipes a rendered prompt
//! into an external command and reads the code from its stdout.

use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::session::Feedback;
use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::PromptEngine;

/// Inputs for one generate step.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub task: &'a str,
    /// Basename of the input artifact.
    pub input_filename: &'a str,
    /// Path under which the executed code sees the input.
    pub data_path: &'a str,
    /// Error and code from the previous failed attempt.
    pub feedback: Option<&'a Feedback>,
}

/// Produces analysis code for a task. Errors are fatal to the control loop.
pub trait CodeGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

/// Generator that runs a configured command: prompt on stdin, code on stdout.
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
    prompts: PromptEngine,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            prompts: PromptEngine::new(),
        }
    }
}

impl CodeGenerator for CommandGenerator {
    #[instrument(skip_all, fields(retry = request.feedback.is_some(), timeout_secs = self.timeout.as_secs()))]
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let prompt = self
            .prompts
            .render_generate(request)
            .context("render generation prompt")?;
        let (program, args) = self
            .command
            .split_first()
            .context("generator command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        info!(program = %program, prompt_len = prompt.len(), "requesting code");
        let output = run_command_with_timeout(cmd, Some(prompt.as_bytes()), self.timeout)
            .with_context(|| format!("run generator {program}"))?;
        if output.timed_out {
            warn!("generator timed out");
            bail!("generator timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            bail!(
                "generator failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            );
        }

        let code = extract_code(&output.stdout_lossy());
        if code.trim().is_empty() {
            bail!("generator returned no code");
        }
        debug!(code_len = code.len(), "received code");
        Ok(code)
    }
}

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("valid fenced block regex"));

/// Pull the script out of a model reply.
///
/// Returns the first fenced block when there is one, otherwise the trimmed
/// reply. An unterminated opening fence is dropped.
pub fn extract_code(reply: &str) -> String {
    let trimmed = reply.trim();
    if let Some(caps) = FENCED_BLOCK_RE.captures(trimmed) {
        return tidy(&caps[1]);
    }
    if trimmed.starts_with("```") {
        return tidy(trimmed.split_once('\n').map_or("", |(_, rest)| rest));
    }
    trimmed.to_string()
}

fn tidy(code: &str) -> String {
    code.trim_start_matches(['\r', '\n']).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn extract_code_strips_python_fence() {
        let reply = "Here you go:\n```python\nimport pandas as pd\nprint(1)\n```\nDone.";
        assert_eq!(extract_code(reply), "import pandas as pd\nprint(1)");
    }

    #[test]
    fn extract_code_handles_bare_and_unterminated_fences() {
        assert_eq!(extract_code("```\nx = 1\n```"), "x = 1");
        assert_eq!(extract_code("```python\nx = 1\n"), "x = 1");
        assert_eq!(extract_code("\n  x = 1\n"), "x = 1");
    }

    #[test]
    fn extract_code_keeps_indentation_inside_block() {
        let reply = "```python\nfor i in range(3):\n    print(i)\n```";
        assert_eq!(extract_code(reply), "for i in range(3):\n    print(i)");
    }

    fn request<'a>(feedback: Option<&'a Feedback>) -> GenerationRequest<'a> {
        GenerationRequest {
            task: "Summarize sales",
            input_filename: "sales.csv",
            data_path: "/workspace/sales.csv",
            feedback,
        }
    }

    fn generator(script: &str, timeout_secs: u64) -> (tempfile::TempDir, CommandGenerator) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gen.sh");
        fs::write(&path, script).expect("write script");
        let generator = CommandGenerator::new(&GeneratorConfig {
            command: vec!["sh".to_string(), path.display().to_string()],
            timeout_secs,
        });
        (temp, generator)
    }

    #[test]
    fn command_generator_pipes_prompt_and_reads_code() {
        let (temp, generator) = generator(
            "cat > \"$(dirname \"$0\")/prompt.txt\"\nprintf '```python\\nprint(\"hi\")\\n```\\n'\n",
            10,
        );
        let feedback = Feedback {
            error: "KeyError: 'region'".to_string(),
            code: "df['region']".to_string(),
        };
        let code = generator
            .generate(&request(Some(&feedback)))
            .expect("generate");
        assert_eq!(code, "print(\"hi\")");

        let prompt = fs::read_to_string(temp.path().join("prompt.txt")).expect("prompt");
        assert!(prompt.contains("Summarize sales"));
        assert!(prompt.contains("pd.read_csv(\"/workspace/sales.csv\")"));
        assert!(prompt.contains("KeyError: 'region'"));
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let (_temp, generator) = generator("cat >/dev/null\necho 'quota exceeded' >&2\nexit 4\n", 10);
        let err = generator.generate(&request(None)).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("quota exceeded"), "{message}");
    }

    #[test]
    fn empty_reply_is_an_error() {
        let (_temp, generator) = generator("cat >/dev/null\nprintf '```python\\n```\\n'\n", 10);
        let err = generator.generate(&request(None)).unwrap_err();
        assert!(err.to_string().contains("no code"));
    }

    #[test]
    fn missing_command_is_an_error() {
        let generator = CommandGenerator::new(&GeneratorConfig {
            command: vec!["/nonexistent/llm".to_string()],
            timeout_secs: 5,
        });
        assert!(generator.generate(&request(None)).is_err());
    }
}
