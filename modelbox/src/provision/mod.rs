//! One-time sandbox provisioning.
//!
//! The strategy is chosen once at configuration time; `setup()` drives the
//! strategy-specific environment steps, then installs the server binary.
//! Idempotency is keyed on marker files: when the strategy's marker is
//! present, setup performs zero network calls. There is no partial cleanup
//! on failure; retry relies on downloads renaming into place and extraction
//! truncating on create.
//!
//! Progress is a single monotonic 0-100 scale with fixed phase boundaries,
//! delivered as typed events over an unbounded channel so a caller can
//! render one continuous bar.

mod bootstrap;
mod interposition;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::arch::CpuArch;
use crate::errors::ModelboxError;
use crate::fetch::{DownloadProgress, Fetcher};
use crate::runtime::constants::{files, phase_bounds};
use crate::runtime::layout::SandboxLayout;
use crate::runtime::options::{RuntimeOptions, Strategy};
use crate::status::Phase;

/// One provisioning progress observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionEvent {
    pub phase: Phase,
    /// Position on the single 0-100 scale. Never moves backwards.
    pub percent: u8,
    pub message: String,
}

pub type EventSender = mpsc::UnboundedSender<ProvisionEvent>;

/// A provisioning failure scoped to the phase it occurred in.
#[derive(Debug, Error)]
#[error("{} failed: {error}", .phase.describe())]
pub struct ProvisionError {
    pub phase: Phase,
    pub error: ModelboxError,
}

pub(crate) fn at(phase: Phase) -> impl Fn(ModelboxError) -> ProvisionError {
    move |error| ProvisionError { phase, error }
}

/// Emits provisioning events, enforcing the monotonic global percent.
pub(crate) struct Reporter {
    events: Option<EventSender>,
    last_percent: u8,
}

impl Reporter {
    fn new(events: Option<EventSender>) -> Self {
        Self {
            events,
            last_percent: 0,
        }
    }

    pub(crate) fn emit(&mut self, phase: Phase, percent: u8, message: impl Into<String>) {
        let percent = percent.clamp(self.last_percent, 100);
        self.last_percent = percent;
        let message = message.into();
        debug!(?phase, percent, "{message}");
        if let Some(events) = &self.events {
            // A dropped receiver just means nobody is rendering progress.
            let _ = events.send(ProvisionEvent {
                phase,
                percent,
                message,
            });
        }
    }

    /// Map a per-download percent onto the `[start, end]` slice of the
    /// global scale. Unknown-length downloads hold at `start`.
    pub(crate) fn download(
        &mut self,
        phase: Phase,
        start: u8,
        end: u8,
        progress: &DownloadProgress,
        what: &str,
    ) {
        let local = u16::from(progress.percent.unwrap_or(0));
        let span = u16::from(end.saturating_sub(start));
        let global = start + (span * local / 100) as u8;
        let message = match progress.bytes_total {
            Some(total) => format!(
                "{what}: {} of {} bytes",
                progress.bytes_downloaded, total
            ),
            None => format!("{what}: {} bytes", progress.bytes_downloaded),
        };
        self.emit(phase, global, message);
    }
}

pub struct Provisioner {
    layout: SandboxLayout,
    options: RuntimeOptions,
    fetcher: Arc<dyn Fetcher>,
    arch: CpuArch,
}

impl Provisioner {
    pub fn new(layout: SandboxLayout, options: RuntimeOptions, fetcher: Arc<dyn Fetcher>) -> Self {
        let abis: Vec<&str> = options.reported_abis.iter().map(String::as_str).collect();
        let arch = CpuArch::resolve(&abis);
        Self {
            layout,
            options,
            fetcher,
            arch,
        }
    }

    /// Provision the sandbox and install the server binary.
    ///
    /// Safe to call repeatedly: a fully provisioned sandbox short-circuits
    /// before any network traffic. A previous partial attempt is absorbed by
    /// the re-download/re-extract steps overwriting it.
    pub async fn setup(&self, events: Option<EventSender>) -> Result<(), ProvisionError> {
        let mut reporter = Reporter::new(events);
        self.layout.prepare().map_err(at(Phase::RootfsDownload))?;

        let state = self.layout.state(self.options.strategy);
        if state.is_runtime_installed {
            info!(root = %self.layout.root().display(), "sandbox already provisioned");
            reporter.emit(
                Phase::ServerInstall,
                phase_bounds::SERVER_INSTALL_END,
                "already provisioned",
            );
            return Ok(());
        }

        if state.is_provisioned {
            reporter.emit(
                Phase::Configure,
                phase_bounds::CONFIGURE_END,
                "environment already provisioned",
            );
            // The environment marker survives an interrupted attempt that had
            // not yet fetched the interposition binary; backfill it alone.
            if self.options.strategy == Strategy::Interposition {
                self.fetch_interposition_binary(&mut reporter).await?;
            }
        } else {
            match self.options.strategy {
                Strategy::Interposition => self.provision_interposition(&mut reporter).await?,
                Strategy::Bootstrap => self.provision_bootstrap(&mut reporter).await?,
                Strategy::DirectBinary => reporter.emit(
                    Phase::Configure,
                    phase_bounds::CONFIGURE_END,
                    "no isolated environment required",
                ),
            }
        }

        if self.layout.server_bin().is_file() {
            reporter.emit(
                Phase::ServerInstall,
                phase_bounds::SERVER_DOWNLOAD_END,
                "server binary already installed",
            );
        } else {
            self.install_server(&mut reporter).await?;
        }

        reporter.emit(
            Phase::ServerInstall,
            phase_bounds::SERVER_INSTALL_END,
            "provisioning complete",
        );
        Ok(())
    }

    /// Download the server release archive and install just the server
    /// binary out of it, executable bit forced.
    async fn install_server(&self, reporter: &mut Reporter) -> Result<(), ProvisionError> {
        let url = self
            .options
            .server_url
            .replace("{arch}", self.arch.server_tag());
        let archive_path = self.layout.tmp_dir().join("server.tgz");

        reporter.emit(
            Phase::ServerDownload,
            phase_bounds::CONFIGURE_END,
            "downloading server release",
        );
        {
            let mut on_progress = |progress: &DownloadProgress| {
                reporter.download(
                    Phase::ServerDownload,
                    phase_bounds::CONFIGURE_END,
                    phase_bounds::SERVER_DOWNLOAD_END,
                    progress,
                    "server release",
                );
            };
            self.fetcher
                .fetch(&url, &archive_path, &mut on_progress)
                .await
                .map_err(at(Phase::ServerDownload))?;
        }

        reporter.emit(
            Phase::ServerInstall,
            phase_bounds::SERVER_DOWNLOAD_END,
            "installing server binary",
        );
        let bin = self.layout.server_bin();
        let archive = archive_path.clone();
        tokio::task::spawn_blocking(move || {
            crate::archive::extract_single_entry(
                &archive,
                std::path::Path::new(files::SERVER_BIN_IN_ARCHIVE),
                &bin,
                true,
            )
        })
        .await
        .map_err(|e| {
            at(Phase::ServerInstall)(ModelboxError::Internal(format!(
                "install task failed: {e}"
            )))
        })?
        .map_err(at(Phase::ServerInstall))?;

        let _ = std::fs::remove_file(&archive_path);
        Ok(())
    }
}
