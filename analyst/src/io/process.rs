//! Helpers for running child processes with a hard timeout.

use std::io::{ErrorKind, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep draining pipes after the child has exited or been killed.
///
/// A descendant that escaped the process group can keep the pipes open
/// indefinitely; past this grace whatever was read so far is returned so
/// callers never block past `timeout + DRAIN_GRACE`.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code, or `None` when the child was killed (always the case on timeout).
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            return None;
        }
        self.status.code()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run a command with a timeout and capture stdout/stderr in full without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. The child leads its own
/// process group, and the whole group is killed once the child exits or times
/// out, so background processes it started do not outlive the call. On
/// timeout whatever was already flushed is returned with `timed_out = true`.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = StreamReader::spawn(stdout);
    let stderr_reader = StreamReader::spawn(stderr);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading its input closes the pipe early.
        if let Err(e) = child_stdin.write_all(input) {
            warn!(err = %e, "child closed stdin before reading all input");
        }
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => {
            // Background jobs the script left behind still hold the pipes.
            kill_process_group(child.id());
            status
        }
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_group(child.id());
            if let Err(e) = child.kill() {
                debug!(err = %e, "child already exited");
            }
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = Instant::now() + DRAIN_GRACE;
    let stdout = stdout_reader.finish(deadline, "stdout")?;
    let stderr = stderr_reader.finish(deadline, "stderr")?;

    debug!(exit_code = ?status.code(), timed_out, stdout_len = stdout.len(), stderr_len = stderr.len(), "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

/// Background pump copying one pipe into a buffer shared with the caller.
struct StreamReader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<std::io::Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            // The receiver may have given up after DRAIN_GRACE.
            let _ = tx.send(pump(reader, &sink));
        });
        Self { buf, done }
    }

    /// Wait for EOF until `deadline`, then return everything read so far.
    fn finish(self, deadline: Instant, label: &str) -> Result<Vec<u8>> {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(wait) {
            Ok(result) => result.with_context(|| format!("read {label}"))?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(stream = label, "output pipe still open after child exit, keeping partial output");
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("{label} reader thread panicked"));
            }
        }
        let mut buf = self
            .buf
            .lock()
            .map_err(|_| anyhow!("{label} buffer poisoned"))?;
        Ok(std::mem::take(&mut *buf))
    }
}

fn pump<R: Read>(mut reader: R, sink: &Mutex<Vec<u8>>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => sink
                .lock()
                .map_err(|_| std::io::Error::other("output buffer poisoned"))?
                .extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// SIGKILL every process in the group led by `pid`. A group that is already
/// gone is not an error.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(err = %e, pgid = raw, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams() {
        let output = run_command_with_timeout(
            sh("printf out; printf err >&2; exit 3"),
            None,
            Duration::from_secs(5),
        )
        .expect("run");
        assert_eq!(output.stdout_lossy(), "out");
        assert_eq!(output.stderr_lossy(), "err");
        assert_eq!(output.exit_code(), Some(3));
        assert!(!output.timed_out);
    }

    #[test]
    fn feeds_stdin() {
        let output =
            run_command_with_timeout(Command::new("cat"), Some(b"hello"), Duration::from_secs(5))
                .expect("run");
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn large_output_is_not_truncated() {
        let output = run_command_with_timeout(
            sh("i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done"),
            None,
            Duration::from_secs(20),
        )
        .expect("run");
        assert_eq!(output.stdout.len(), 20000 * 11);
    }

    #[test]
    fn kills_on_timeout() {
        let start = Instant::now();
        let output = run_command_with_timeout(
            sh("printf early; exec sleep 10"),
            None,
            Duration::from_millis(200),
        )
        .expect("run");
        assert!(output.timed_out);
        assert_eq!(output.exit_code(), None);
        assert_eq!(output.stdout_lossy(), "early");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn background_child_does_not_swallow_output() {
        let start = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5 & echo partial; echo 'Traceback: boom' >&2; exit 1"),
            None,
            Duration::from_secs(5),
        )
        .expect("run");
        assert_eq!(output.stdout_lossy(), "partial\n");
        assert_eq!(output.stderr_lossy(), "Traceback: boom\n");
        assert_eq!(output.exit_code(), Some(1));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_kills_descendants() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker = temp.path().join("marker");
        let script = format!("(sleep 1; touch '{}') & sleep 10", marker.display());
        let output =
            run_command_with_timeout(sh(&script), None, Duration::from_millis(300)).expect("run");
        assert!(output.timed_out);
        thread::sleep(Duration::from_secs(2));
        assert!(!marker.exists(), "background job survived the timeout");
    }

    #[test]
    fn finished_command_leaves_no_descendants() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker = temp.path().join("marker");
        let script = format!("(sleep 1; touch '{}') & exit 0", marker.display());
        let output = run_command_with_timeout(sh(&script), None, Duration::from_secs(5)).expect("run");
        assert_eq!(output.exit_code(), Some(0));
        thread::sleep(Duration::from_secs(2));
        assert!(!marker.exists(), "background job outlived its parent");
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("/nonexistent/analyst-test-binary"),
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn"));
    }
}
