//! The runtime context object tying provisioning, supervision, and status
//! together behind one façade. Raw [`ModelboxError`]s never cross this
//! boundary without also being classified into the last-error register.

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::ApiClient;
use crate::errors::{ModelboxError, ModelboxResult};
use crate::fetch::{ArchiveFetcher, Fetcher};
use crate::provision::{EventSender, Provisioner};
use crate::runtime::constants::limits;
use crate::runtime::layout::{SandboxLayout, SandboxState};
use crate::runtime::options::RuntimeOptions;
use crate::status::{ErrorRecord, LastError, Phase, ServerStatus, classify};
use crate::supervisor::{HealthProber, ServerSupervisor};

pub struct LocalRuntime {
    layout: SandboxLayout,
    options: RuntimeOptions,
    provisioner: Provisioner,
    supervisor: ServerSupervisor,
    prober: HealthProber,
    last_error: LastError,
}

impl LocalRuntime {
    pub fn new(options: RuntimeOptions) -> ModelboxResult<Self> {
        Self::with_fetcher(options, Arc::new(ArchiveFetcher::new()))
    }

    /// Construct with an explicit fetcher. Tests inject fakes here.
    pub fn with_fetcher(options: RuntimeOptions, fetcher: Arc<dyn Fetcher>) -> ModelboxResult<Self> {
        let layout = SandboxLayout::new(options.home_dir.clone());
        let provisioner = Provisioner::new(layout.clone(), options.clone(), fetcher);
        let supervisor = ServerSupervisor::new(layout.clone(), options.clone());
        let prober = HealthProber::new(options.server_base_url())?;
        Ok(Self {
            layout,
            options,
            provisioner,
            supervisor,
            prober,
            last_error: LastError::default(),
        })
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Current sandbox state, derived from filesystem presence checks.
    pub fn state(&self) -> SandboxState {
        self.layout.state(self.options.strategy)
    }

    /// The classified record of the most recent failure, if any.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.last_error.get()
    }

    /// Client for the supervised server's HTTP API.
    pub fn api(&self) -> ModelboxResult<ApiClient> {
        ApiClient::new(self.options.server_base_url())
    }

    /// Provision the sandbox. Idempotent; progress events flow to `events`
    /// when provided.
    pub async fn setup(&self, events: Option<EventSender>) -> ModelboxResult<()> {
        match self.provisioner.setup(events).await {
            Ok(()) => {
                self.last_error.clear();
                Ok(())
            }
            Err(failure) => {
                let record = classify(failure.phase, &failure.error);
                warn!(
                    code = ?record.code,
                    phase = ?record.phase,
                    "provisioning failed: {}", record.message
                );
                self.last_error.record(record);
                Err(failure.error)
            }
        }
    }

    /// Launch the server and wait until it answers its readiness probe.
    ///
    /// On failure the child is stopped, the classified record (with the
    /// captured stderr prefix for early exits) lands in the last-error
    /// register, and the raw error is returned.
    pub async fn start(&self) -> ModelboxResult<()> {
        if let Err(error) = self.supervisor.start() {
            self.last_error.record(classify(Phase::Launch, &error));
            return Err(error);
        }

        let result = self
            .prober
            .wait_until_ready(limits::READINESS_ATTEMPTS, limits::READINESS_INTERVAL, || {
                self.supervisor.poll()
            })
            .await;

        match result {
            Ok(()) => {
                self.last_error.clear();
                info!(listen = %self.options.listen_addr, "server ready");
                Ok(())
            }
            Err(error) => {
                let mut record = classify(Phase::Readiness, &error);
                if matches!(error, ModelboxError::ProcessExited { .. })
                    && let Some(prefix) = self.supervisor.stderr_prefix()
                    && !prefix.trim().is_empty()
                {
                    record.message = format!("{}; stderr: {}", record.message, prefix.trim());
                }
                self.last_error.record(record);
                self.supervisor.stop().await;
                Err(error)
            }
        }
    }

    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    /// Stop, settle, start-with-readiness.
    pub async fn restart(&self) -> ModelboxResult<()> {
        self.supervisor.stop().await;
        tokio::time::sleep(limits::RESTART_SETTLE).await;
        self.start().await
    }

    /// Tri-state status: reachability first, installation second.
    pub async fn status(&self) -> ServerStatus {
        if self.prober.check_reachable().await {
            return ServerStatus::Running;
        }
        if self.state().is_runtime_installed {
            ServerStatus::Stopped
        } else {
            ServerStatus::NotInstalled
        }
    }

    /// Destroy all sandbox state after stopping any supervised process.
    pub async fn reset(&self) -> ModelboxResult<()> {
        self.supervisor.stop().await;
        self.layout.reset()?;
        self.last_error.clear();
        info!(root = %self.layout.root().display(), "sandbox reset");
        Ok(())
    }
}
