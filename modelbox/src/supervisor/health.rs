//! Liveness probing against the server's model-listing endpoint.
//!
//! "Process is alive" and "server answers HTTP" are different facts; the
//! probe establishes the second. Readiness waits interleave probes with
//! process-exit checks so a crashed child fails fast instead of burning the
//! whole attempt budget.

use std::time::Duration;

use tracing::{debug, trace};

use crate::errors::{ModelboxError, ModelboxResult};
use crate::runtime::constants::{limits, server};

/// What the supervisor knows about the child at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exited with the given code; `None` means killed by signal.
    Exited(Option<i32>),
}

pub struct HealthProber {
    base_url: String,
    client: reqwest::Client,
}

impl HealthProber {
    pub fn new(base_url: impl Into<String>) -> ModelboxResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(limits::PROBE_TIMEOUT)
            .build()
            .map_err(|e| ModelboxError::Internal(format!("failed to build probe client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// One probe: true iff the model-listing endpoint answers 2xx within the
    /// probe timeout. Connection refused, timeouts, and non-2xx all read as
    /// "not reachable"; they are expected during startup.
    pub async fn check_reachable(&self) -> bool {
        let url = format!("{}{}", self.base_url, server::TAGS_PATH);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                trace!(url, status = response.status().as_u16(), "probe answered");
                ok
            }
            Err(e) => {
                trace!(url, "probe failed: {}", e);
                false
            }
        }
    }

    /// Poll until the server answers, the child dies, or `attempts` probes
    /// have failed. `poll_exit` is consulted before every probe so an early
    /// exit surfaces as [`ModelboxError::ProcessExited`] immediately.
    pub async fn wait_until_ready(
        &self,
        attempts: u32,
        interval: Duration,
        mut poll_exit: impl FnMut() -> ProcessState,
    ) -> ModelboxResult<()> {
        for attempt in 1..=attempts {
            if let ProcessState::Exited(code) = poll_exit() {
                return Err(ModelboxError::ProcessExited { code });
            }
            if self.check_reachable().await {
                debug!(attempt, "server answered readiness probe");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        Err(ModelboxError::ReadinessTimeout { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_status(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = b"{\"models\":[]}";
                let response = format!(
                    "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(body).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_reachable_on_success_status() {
        let base = serve_status("HTTP/1.1 200 OK").await;
        let prober = HealthProber::new(base).unwrap();
        assert!(prober.check_reachable().await);
    }

    #[tokio::test]
    async fn test_not_reachable_on_server_error() {
        let base = serve_status("HTTP/1.1 500 Internal Server Error").await;
        let prober = HealthProber::new(base).unwrap();
        assert!(!prober.check_reachable().await);
    }

    #[tokio::test]
    async fn test_not_reachable_when_nothing_listens() {
        // Bind then drop to get an address that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HealthProber::new(format!("http://{addr}")).unwrap();
        assert!(!prober.check_reachable().await);
    }

    #[tokio::test]
    async fn test_wait_succeeds_while_process_runs() {
        let base = serve_status("HTTP/1.1 200 OK").await;
        let prober = HealthProber::new(base).unwrap();
        prober
            .wait_until_ready(5, Duration::from_millis(10), || ProcessState::Running)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_aborts_on_process_exit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HealthProber::new(format!("http://{addr}")).unwrap();
        let mut polls = 0;
        let err = prober
            .wait_until_ready(100, Duration::from_millis(10), || {
                polls += 1;
                if polls >= 3 {
                    ProcessState::Exited(Some(1))
                } else {
                    ProcessState::Running
                }
            })
            .await
            .unwrap_err();

        // Fails with the exit error well before the attempt budget runs out.
        assert!(matches!(
            err,
            ModelboxError::ProcessExited { code: Some(1) }
        ));
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_wait_times_out_after_attempt_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HealthProber::new(format!("http://{addr}")).unwrap();
        let err = prober
            .wait_until_ready(3, Duration::from_millis(5), || ProcessState::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelboxError::ReadinessTimeout { attempts: 3 }));
    }
}
