//! Server process supervision.
//!
//! One supervisor owns at most one child at a time, guarded by a single
//! handle slot. Launch checks its prerequisite files in a fixed order so a
//! missing file surfaces as the same distinct error on every attempt, and
//! never spawns a process that is guaranteed to die.

mod health;
mod reader;

pub use health::{HealthProber, ProcessState};

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::{ModelboxError, ModelboxResult, Prerequisite};
use crate::runtime::constants::{files, limits, server};
use crate::runtime::layout::SandboxLayout;
use crate::runtime::options::{RuntimeOptions, Strategy};

use reader::OutputRelay;

/// Mount point for the sandbox `bin/` dir inside the interposed rootfs.
const INTERPOSED_BIN_MOUNT: &str = "/opt/modelbox";

struct ServerHandle {
    child: Child,
    relay: Option<OutputRelay>,
}

pub struct ServerSupervisor {
    layout: SandboxLayout,
    options: RuntimeOptions,
    slot: Mutex<Option<ServerHandle>>,
}

impl ServerSupervisor {
    pub fn new(layout: SandboxLayout, options: RuntimeOptions) -> Self {
        Self {
            layout,
            options,
            slot: Mutex::new(None),
        }
    }

    /// Spawn the server if it is not already running.
    ///
    /// Calling start on a live child is a no-op; a dead child left in the
    /// slot is reaped and replaced. Readiness is the caller's concern, via
    /// [`HealthProber::wait_until_ready`] with [`ServerSupervisor::poll`].
    pub fn start(&self) -> ModelboxResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(handle) = slot.as_mut() {
            match handle.child.try_wait() {
                Ok(None) => {
                    debug!(pid = handle.child.id(), "server already running");
                    return Ok(());
                }
                Ok(Some(status)) => {
                    debug!(code = ?status.code(), "reaping exited server before restart");
                    *slot = None;
                }
                Err(e) => {
                    warn!("failed to poll stale server handle: {}", e);
                    *slot = None;
                }
            }
        }

        // The slot only covers children of this process; a server started by
        // a previous invocation of the binary is reachable through the pid
        // file alone.
        match read_pid(&self.layout) {
            Some(pid) if pid_alive(pid) => {
                debug!(pid, "server already running from a previous process");
                return Ok(());
            }
            Some(_) => {
                let _ = std::fs::remove_file(self.layout.pid_file());
            }
            None => {}
        }

        self.check_prerequisites()?;

        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| ModelboxError::Launch(format!("failed to spawn server: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ModelboxError::Launch("server stdout pipe not available".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ModelboxError::Launch("server stderr pipe not available".into()))?;
        let relay = OutputRelay::new(stdout, stderr).inspect_err(|_| {
            let _ = child.kill();
            let _ = child.wait();
        })?;

        if let Err(e) = std::fs::write(self.layout.pid_file(), child.id().to_string()) {
            warn!("failed to record server pid: {}", e);
        }

        info!(
            pid = child.id(),
            strategy = ?self.options.strategy,
            listen = %self.options.listen_addr,
            "server process spawned"
        );
        *slot = Some(ServerHandle {
            child,
            relay: Some(relay),
        });
        Ok(())
    }

    /// Prerequisites in fixed order: interposition binary, server binary,
    /// root filesystem. The first gap wins.
    fn check_prerequisites(&self) -> ModelboxResult<()> {
        if self.options.strategy == Strategy::Interposition
            && !self.layout.interposition_bin().is_file()
        {
            return Err(ModelboxError::MissingPrerequisite(
                Prerequisite::InterpositionBinary,
            ));
        }
        if !self.layout.server_bin().is_file() {
            return Err(ModelboxError::MissingPrerequisite(Prerequisite::ServerBinary));
        }
        if matches!(
            self.options.strategy,
            Strategy::Interposition | Strategy::Bootstrap
        ) && !self.layout.rootfs_marker().is_file()
        {
            return Err(ModelboxError::MissingPrerequisite(
                Prerequisite::RootFilesystem,
            ));
        }
        Ok(())
    }

    /// Build the launch command with a scrubbed environment. Arguments are
    /// always structured argv entries, never a shell string.
    fn build_command(&self) -> Command {
        let layout = &self.layout;
        let mut command = match self.options.strategy {
            Strategy::Interposition => {
                let mut c = Command::new(layout.interposition_bin());
                c.arg("-r")
                    .arg(layout.rootfs_dir())
                    .arg("-b")
                    .arg("/dev")
                    .arg("-b")
                    .arg("/proc")
                    .arg("-b")
                    .arg("/sys")
                    .arg("-b")
                    .arg(format!(
                        "{}:{INTERPOSED_BIN_MOUNT}",
                        layout.bin_dir().display()
                    ))
                    .arg("-w")
                    .arg("/root")
                    .arg("--kill-on-exit")
                    .arg(format!("{INTERPOSED_BIN_MOUNT}/{}", files::SERVER_BIN))
                    .arg(server::SERVE_ARG);
                c
            }
            Strategy::Bootstrap | Strategy::DirectBinary => {
                let mut c = Command::new(layout.server_bin());
                c.arg(server::SERVE_ARG);
                c
            }
        };

        // Inherited host variables can leak paths the sandboxed process must
        // not see; start from an empty environment.
        command
            .env_clear()
            .env("HOME", layout.home_dir())
            .env("TMPDIR", layout.tmp_dir())
            .env("PATH", format!("{}:/usr/bin:/bin", layout.bin_dir().display()))
            .env("LD_LIBRARY_PATH", layout.lib_dir())
            .env("LANG", "en_US.UTF-8")
            .env(server::HOST_ENV, &self.options.listen_addr)
            .current_dir(layout.home_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.options.strategy == Strategy::Interposition {
            command.env("PROOT_TMP_DIR", layout.tmp_dir());
        }
        command
    }

    /// Instantaneous child state, reaping-safe (`try_wait` leaves the handle
    /// usable). An empty slot falls back to the recorded pid, so a server
    /// from a previous process still reads as running.
    pub fn poll(&self) -> ProcessState {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_mut() {
            Some(handle) => match handle.child.try_wait() {
                Ok(None) => ProcessState::Running,
                Ok(Some(status)) => ProcessState::Exited(status.code()),
                Err(e) => {
                    warn!("failed to poll server process: {}", e);
                    ProcessState::Exited(None)
                }
            },
            None => match read_pid(&self.layout) {
                Some(pid) if pid_alive(pid) => ProcessState::Running,
                _ => ProcessState::Exited(None),
            },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.poll(), ProcessState::Running)
    }

    /// The bounded stderr prefix captured from the current (or most recent
    /// still-held) child, for attaching to launch failures.
    pub fn stderr_prefix(&self) -> Option<String> {
        let slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.as_ref()
            .and_then(|handle| handle.relay.as_ref())
            .map(|relay| relay.stderr_prefix())
    }

    /// Stop the child: SIGTERM, a grace period of polling, then SIGKILL.
    /// Always leaves the slot empty, even if signalling fails.
    pub async fn stop(&self) {
        let taken = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut handle) = taken else {
            self.stop_external().await;
            return;
        };

        let pid = handle.child.id();
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        let deadline = Instant::now() + limits::STOP_GRACE;
        loop {
            match handle.child.try_wait() {
                Ok(Some(status)) => {
                    info!(pid, code = ?status.code(), "server stopped");
                    break;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!(pid, "server ignored SIGTERM within grace period, killing");
                    let _ = handle.child.kill();
                    let _ = handle.child.wait();
                    break;
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(100)).await,
                Err(e) => {
                    warn!(pid, "failed to wait for server: {}", e);
                    let _ = handle.child.kill();
                    let _ = handle.child.wait();
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(self.layout.pid_file());

        // Child is reaped, pipes are closed; drain the reader threads.
        if let Some(relay) = handle.relay.take() {
            relay.shutdown();
        }
    }

    /// Stop a server recorded by a previous process. The pid file is the
    /// only reach left once the `Child` handle is gone; liveness is probed
    /// with a null signal instead of `try_wait`.
    async fn stop_external(&self) {
        let Some(pid) = read_pid(&self.layout) else {
            debug!("stop requested with no supervised process");
            return;
        };
        if !pid_alive(pid) {
            let _ = std::fs::remove_file(self.layout.pid_file());
            return;
        }

        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        let deadline = Instant::now() + limits::STOP_GRACE;
        while pid_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if pid_alive(pid) {
            warn!(pid, "server ignored SIGTERM within grace period, killing");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
        }
        let _ = std::fs::remove_file(self.layout.pid_file());
        info!(pid, "server stopped");
    }
}

fn read_pid(layout: &SandboxLayout) -> Option<i32> {
    let raw = std::fs::read_to_string(layout.pid_file()).ok()?;
    raw.trim().parse().ok()
}

fn pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
