//! HTTP client backend for the sandbox service.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use tracing::{debug, instrument, warn};

use crate::core::types::{ExecutionRequest, ExecutionResult, RunRequest};
use crate::io::backend::{ExecutionBackend, join_sandbox_path};
use crate::io::config::HttpConfig;

/// Backend that posts code to a remote `/run` endpoint.
///
/// The service enforces the execution timeout itself; the client bound only
/// guards against a hung connection.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    url: String,
    data_dir: String,
}

impl HttpBackend {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            data_dir: config.data_dir.clone(),
        })
    }

    fn call(&self, code: &str) -> Result<ExecutionResult> {
        let body = RunRequest {
            code: code.to_string(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("sandbox service returned {status}: {}", text.trim());
        }
        let mut result: ExecutionResult = response.json().context("decode sandbox reply")?;
        if result.echoed_code.is_empty() {
            result.echoed_code = code.to_string();
        }
        Ok(result)
    }
}

impl ExecutionBackend for HttpBackend {
    fn sandbox_data_path(&self, file_name: &str) -> String {
        join_sandbox_path(&self.data_dir, file_name)
    }

    #[instrument(skip_all, fields(url = %self.url))]
    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        match self.call(&request.code) {
            Ok(result) => {
                debug!(images = result.images.len(), has_error = result.has_error(), "sandbox replied");
                result
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox request failed");
                ExecutionResult::infrastructure_failure(&request.code, format!("HttpError: {err:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one canned HTTP response and hand back the raw request.
    fn one_shot_server(status: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/run", listener.local_addr().expect("addr"));
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).expect("read");
                raw.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&raw) {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).expect("write");
            String::from_utf8_lossy(&raw).into_owned()
        });
        (url, handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + length
    }

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(&HttpConfig {
            url: url.to_string(),
            request_timeout_secs: 5,
            ..HttpConfig::default()
        })
        .expect("client")
    }

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            input_path: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn posts_code_and_decodes_reply() {
        let (url, server) = one_shot_server(
            "200 OK",
            r#"{"stdout":"42\n","stderr":"","images":["UE5H"],"csv":"a\n1\n","code":"print(42)"}"#,
        );
        let result = backend(&url).execute(&request("print(42)"));
        let raw = server.join().expect("server");

        assert!(raw.starts_with("POST /run "));
        assert!(raw.ends_with(r#"{"code":"print(42)"}"#));
        assert_eq!(result.stdout, "42\n");
        assert_eq!(result.images, vec![b"PNG".to_vec()]);
        assert_eq!(result.tabular_text.as_deref(), Some("a\n1\n"));
        assert!(!result.has_error());
    }

    #[test]
    fn reply_without_code_echoes_sent_code() {
        let (url, server) = one_shot_server("200 OK", r#"{"stdout":"","stderr":"boom"}"#);
        let result = backend(&url).execute(&request("raise SystemExit"));
        server.join().expect("server");
        assert_eq!(result.echoed_code, "raise SystemExit");
        assert_eq!(result.stderr, "boom");
    }

    #[test]
    fn error_status_becomes_stderr_result() {
        let (url, server) = one_shot_server("500 Internal Server Error", r#"{"error":"down"}"#);
        let result = backend(&url).execute(&request("print(1)"));
        server.join().expect("server");
        assert_eq!(result.stdout, "");
        assert!(result.stderr.starts_with("HttpError:"));
        assert!(result.stderr.contains("500"));
    }

    #[test]
    fn malformed_reply_becomes_stderr_result() {
        let (url, server) = one_shot_server("200 OK", "not json");
        let result = backend(&url).execute(&request("print(1)"));
        server.join().expect("server");
        assert!(result.stderr.contains("decode sandbox reply"));
        assert_eq!(result.echoed_code, "print(1)");
    }

    #[test]
    fn unreachable_service_becomes_stderr_result() {
        let port = TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr")
            .port();
        let result = backend(&format!("http://127.0.0.1:{port}/run")).execute(&request("x"));
        assert!(result.stderr.starts_with("HttpError:"));
        assert!(result.images.is_empty());
    }

    #[test]
    fn sandbox_data_path_uses_service_data_dir() {
        let backend = backend("http://localhost:5000/run");
        assert_eq!(backend.sandbox_data_path("sales.csv"), "/app/data/sales.csv");
    }
}
