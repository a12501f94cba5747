//! Shared deterministic types for the execution engine and control loop.
//!
//! [`ExecutionResult`] crosses process and network boundaries: its serialized
//! form is the sandbox service wire contract and must remain stable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single request to run code in an isolated environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Script text, already sanitized.
    pub code: String,
    /// Host path of the input data artifact, copied into the workspace when present.
    pub input_path: Option<PathBuf>,
    /// Hard wall-clock bound for the execution, cleanup included.
    pub timeout: Duration,
}

/// Structured outcome of one execution.
///
/// Images are raw bytes in memory and base64 strings on the wire. A missing
/// table serializes as an empty `csv` string. `exit_code` and `timed_out` are
/// additive status fields; replies without them still decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Exit code of the execution unit; `None` when it never ran or was killed.
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, with = "wire::images")]
    pub images: Vec<Vec<u8>>,
    #[serde(default, rename = "csv", with = "wire::optional_text")]
    pub tabular_text: Option<String>,
    #[serde(default, rename = "code")]
    pub echoed_code: String,
}

impl ExecutionResult {
    /// Result for an execution that could not be carried out at all.
    pub fn infrastructure_failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            echoed_code: code.to_string(),
            ..Self::default()
        }
    }

    /// Any stderr output counts as a failed execution.
    pub fn has_error(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Stderr line appended when an execution exceeds its time budget.
pub fn timeout_message(timeout: Duration) -> String {
    format!(
        "TimeoutError: execution timed out after {:.1}s and was terminated",
        timeout.as_secs_f64()
    )
}

/// Append [`timeout_message`] to captured stderr on a line of its own.
pub fn append_timeout_notice(stderr: &mut String, timeout: Duration) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(&timeout_message(timeout));
    stderr.push('\n');
}

/// Request body accepted by the sandbox service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub code: String,
}

/// Tabular input formats the generated code may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Excel,
    Json,
    Parquet,
}

impl DataFormat {
    /// Detect the format from a file extension; unknown extensions read as CSV.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("xlsx") | Some("xls") => Self::Excel,
            Some("json") => Self::Json,
            Some("parquet") => Self::Parquet,
            _ => Self::Csv,
        }
    }

    /// Fully qualified pandas reader for this format.
    pub fn reader(self) -> &'static str {
        match self {
            Self::Csv => "pd.read_csv",
            Self::Excel => "pd.read_excel",
            Self::Json => "pd.read_json",
            Self::Parquet => "pd.read_parquet",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Excel => "Excel",
            Self::Json => "JSON",
            Self::Parquet => "Parquet",
        }
    }
}

mod wire {
    pub mod images {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;
        use serde::de::Error;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(images: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(images.iter().map(|bytes| STANDARD.encode(bytes)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
            let encoded = Vec::<String>::deserialize(deserializer)?;
            encoded
                .iter()
                .map(|item| STANDARD.decode(item).map_err(D::Error::custom))
                .collect()
        }
    }

    pub mod optional_text {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(text: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(text.as_deref().unwrap_or_default())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
            let text = Option::<String>::deserialize(deserializer)?;
            Ok(text.filter(|text| !text.is_empty()))
        }
    }
}
