//! Relays server stdout/stderr into the host's tracing system.

use std::{
    io::{BufRead, BufReader},
    process::{ChildStderr, ChildStdout},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use crate::errors::{ModelboxError, ModelboxResult};
use crate::runtime::constants::limits;

/// Log level for server output streams.
#[derive(Debug, Clone, Copy)]
enum LogLevel {
    Debug,
    Warn,
}

/// Owns the reader threads for a supervised server's stdio pipes.
///
/// Each stream gets a dedicated thread that reads lines and re-logs them
/// through tracing. The stderr thread additionally retains a bounded prefix
/// of raw output: when a crash-looping server dies before readiness, its
/// first lines carry the original cause, so the prefix (never the suffix)
/// is what gets attached to the failure.
pub(super) struct OutputRelay {
    stdout_thread: Option<JoinHandle<()>>,
    stderr_thread: Option<JoinHandle<()>>,
    stderr_prefix: Arc<Mutex<Vec<u8>>>,
}

impl OutputRelay {
    pub(super) fn new(stdout: ChildStdout, stderr: ChildStderr) -> ModelboxResult<Self> {
        let stderr_prefix = Arc::new(Mutex::new(Vec::new()));

        let stdout_thread =
            Self::spawn_reader_thread(BufReader::new(stdout), "stdout", LogLevel::Debug, None)?;
        let stderr_thread = Self::spawn_reader_thread(
            BufReader::new(stderr),
            "stderr",
            LogLevel::Warn,
            Some(Arc::clone(&stderr_prefix)),
        )?;

        Ok(Self {
            stdout_thread: Some(stdout_thread),
            stderr_thread: Some(stderr_thread),
            stderr_prefix,
        })
    }

    /// The captured stderr prefix so far, lossily decoded.
    pub(super) fn stderr_prefix(&self) -> String {
        let buf = self
            .stderr_prefix
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn spawn_reader_thread<R: BufRead + Send + 'static>(
        reader: R,
        stream_name: &str,
        log_level: LogLevel,
        prefix: Option<Arc<Mutex<Vec<u8>>>>,
    ) -> ModelboxResult<JoinHandle<()>> {
        let thread_name = format!("server-{stream_name}");
        let stream_name_owned = stream_name.to_string();

        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            if let Some(ref prefix) = prefix {
                                let mut buf = prefix
                                    .lock()
                                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                                let remaining =
                                    limits::STDERR_TAIL_BYTES.saturating_sub(buf.len());
                                if remaining > 0 {
                                    let take = remaining.min(line.len() + 1);
                                    buf.extend_from_slice(&line.as_bytes()[..take.min(line.len())]);
                                    if take > line.len() {
                                        buf.push(b'\n');
                                    }
                                }
                            }
                            match log_level {
                                LogLevel::Debug => {
                                    tracing::debug!(target: "server:stdout", "{}", line);
                                }
                                LogLevel::Warn => {
                                    tracing::warn!(target: "server:stderr", "{}", line);
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                stream = %stream_name_owned,
                                "failed to read from server pipe: {}", e
                            );
                            break;
                        }
                    }
                }
                tracing::debug!(stream = %stream_name_owned, "server pipe closed");
            })
            .map_err(|e| {
                ModelboxError::Launch(format!("failed to spawn {stream_name} reader thread: {e}"))
            })
    }

    /// Waits for both reader threads to drain. Call after the child has been
    /// reaped; the threads exit at EOF on their pipes.
    pub(super) fn shutdown(mut self) {
        if let Some(handle) = self.stdout_thread.take()
            && handle.join().is_err()
        {
            tracing::warn!("stdout reader thread panicked");
        }
        if let Some(handle) = self.stderr_thread.take()
            && handle.join().is_err()
        {
            tracing::warn!("stderr reader thread panicked");
        }
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.stdout_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn_sh(script: &str) -> std::process::Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_captures_stderr_prefix() {
        let mut child = spawn_sh("echo out; echo first error >&2; echo second >&2");
        let relay = OutputRelay::new(child.stdout.take().unwrap(), child.stderr.take().unwrap())
            .unwrap();
        child.wait().unwrap();
        relay_wait(&relay);

        let prefix = relay.stderr_prefix();
        assert!(prefix.contains("first error"));
        assert!(prefix.contains("second"));
        assert!(!prefix.contains("out"));
        relay.shutdown();
    }

    #[test]
    fn test_prefix_is_bounded() {
        // Emit well past the cap; the retained prefix must stop at it.
        let mut child = spawn_sh("i=0; while [ $i -lt 2000 ]; do echo 0123456789 >&2; i=$((i+1)); done");
        let relay = OutputRelay::new(child.stdout.take().unwrap(), child.stderr.take().unwrap())
            .unwrap();
        child.wait().unwrap();
        relay_wait(&relay);

        assert!(relay.stderr_prefix().len() <= limits::STDERR_TAIL_BYTES);
        relay.shutdown();
    }

    // The reader threads race the wait() above; give them a moment to drain
    // the (already-closed) pipes before asserting.
    fn relay_wait(relay: &OutputRelay) {
        for _ in 0..50 {
            if relay
                .stdout_thread
                .as_ref()
                .map(|t| t.is_finished())
                .unwrap_or(true)
                && relay
                    .stderr_thread
                    .as_ref()
                    .map(|t| t.is_finished())
                    .unwrap_or(true)
            {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }
}
