//! Interposition strategy: a user-space syscall-interposition binary plus a
//! minimal Linux rootfs image, so a server binary linked against a foreign C
//! library can run without privileged chroot.

use std::os::unix::fs::PermissionsExt;

use tracing::{debug, info};

use crate::archive::{self, ArchiveFormat};
use crate::errors::ModelboxError;
use crate::fetch::DownloadProgress;
use crate::runtime::constants::{files, phase_bounds};
use crate::status::Phase;

use super::{Provisioner, ProvisionError, Reporter, at};

/// Slice of the rootfs-download phase spent on the interposition binary
/// itself; it is a few MiB next to a much larger image.
const INTERPOSITION_DOWNLOAD_END: u8 = 8;

/// Nameservers written into the rootfs resolver config. The rootfs ships
/// without one, and its package manager needs DNS on first run.
const NAMESERVERS: [&str; 2] = ["8.8.8.8", "1.1.1.1"];

impl Provisioner {
    pub(super) async fn provision_interposition(
        &self,
        reporter: &mut Reporter,
    ) -> Result<(), ProvisionError> {
        self.fetch_interposition_binary(reporter).await?;

        let url = self
            .options
            .rootfs_url
            .replace("{arch}", self.arch.rootfs_tag());
        let archive_path = self.layout.tmp_dir().join("rootfs.tar.gz");
        {
            let mut on_progress = |progress: &DownloadProgress| {
                reporter.download(
                    Phase::RootfsDownload,
                    INTERPOSITION_DOWNLOAD_END,
                    phase_bounds::ROOTFS_DOWNLOAD_END,
                    progress,
                    "root filesystem image",
                );
            };
            self.fetcher
                .fetch(&url, &archive_path, &mut on_progress)
                .await
                .map_err(at(Phase::RootfsDownload))?;
        }

        reporter.emit(
            Phase::RootfsExtract,
            phase_bounds::ROOTFS_DOWNLOAD_END,
            "extracting root filesystem",
        );
        let rootfs_dir = self.layout.rootfs_dir();
        let archive = archive_path.clone();
        tokio::task::spawn_blocking(move || {
            archive::extract(&archive, &rootfs_dir, ArchiveFormat::TarGz)
        })
        .await
        .map_err(|e| {
            at(Phase::RootfsExtract)(ModelboxError::Internal(format!(
                "extraction task failed: {e}"
            )))
        })?
        .map_err(at(Phase::RootfsExtract))?;

        // The marker doubles as an integrity check on the image contents.
        if !self.layout.rootfs_marker().is_file() {
            return Err(at(Phase::RootfsExtract)(ModelboxError::Archive(format!(
                "rootfs image did not provide {}",
                files::ROOTFS_MARKER
            ))));
        }
        let _ = std::fs::remove_file(&archive_path);
        reporter.emit(
            Phase::RootfsExtract,
            phase_bounds::ROOTFS_EXTRACT_END,
            "root filesystem extracted",
        );

        self.configure_rootfs(reporter)?;
        if self.options.install_compat_shim {
            self.install_compat_shim(reporter).await?;
        }
        reporter.emit(
            Phase::Configure,
            phase_bounds::CONFIGURE_END,
            "sandbox configured",
        );
        info!(root = %self.layout.rootfs_dir().display(), "interposition environment ready");
        Ok(())
    }

    /// Fetch the interposition binary if absent and mark it executable.
    pub(super) async fn fetch_interposition_binary(
        &self,
        reporter: &mut Reporter,
    ) -> Result<(), ProvisionError> {
        let dest = self.layout.interposition_bin();
        if dest.is_file() {
            debug!(path = %dest.display(), "interposition binary already present");
            return Ok(());
        }

        let url = self
            .options
            .interposition_url
            .replace("{arch}", self.arch.interposition_tag());
        reporter.emit(
            Phase::RootfsDownload,
            phase_bounds::ROOTFS_DOWNLOAD_START,
            "downloading interposition binary",
        );
        {
            let mut on_progress = |progress: &DownloadProgress| {
                reporter.download(
                    Phase::RootfsDownload,
                    phase_bounds::ROOTFS_DOWNLOAD_START,
                    INTERPOSITION_DOWNLOAD_END,
                    progress,
                    "interposition binary",
                );
            };
            self.fetcher
                .fetch(&url, &dest, &mut on_progress)
                .await
                .map_err(at(Phase::RootfsDownload))?;
        }
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
            at(Phase::RootfsDownload)(ModelboxError::Storage(format!(
                "chmod {} failed: {}",
                dest.display(),
                e
            )))
        })?;
        Ok(())
    }

    fn configure_rootfs(&self, reporter: &mut Reporter) -> Result<(), ProvisionError> {
        reporter.emit(
            Phase::Configure,
            phase_bounds::ROOTFS_EXTRACT_END,
            "writing resolver configuration",
        );
        let resolv = self.layout.resolv_conf();
        if let Some(parent) = resolv.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                at(Phase::Configure)(ModelboxError::Storage(format!(
                    "failed to create {}: {}",
                    parent.display(),
                    e
                )))
            })?;
        }
        let contents: String = NAMESERVERS
            .iter()
            .map(|ns| format!("nameserver {ns}\n"))
            .collect();
        std::fs::write(&resolv, contents).map_err(|e| {
            at(Phase::Configure)(ModelboxError::Storage(format!(
                "failed to write {}: {}",
                resolv.display(),
                e
            )))
        })?;
        Ok(())
    }

    /// One-shot run of the rootfs's own package manager, through the
    /// interposition binary, to install the C-library compatibility shim.
    /// Structured argv throughout; the command is never a shell string.
    async fn install_compat_shim(&self, reporter: &mut Reporter) -> Result<(), ProvisionError> {
        reporter.emit(
            Phase::Configure,
            phase_bounds::ROOTFS_EXTRACT_END,
            "installing C-library compatibility shim",
        );

        let mut command = tokio::process::Command::new(self.layout.interposition_bin());
        command
            .arg("-r")
            .arg(self.layout.rootfs_dir())
            .arg("-b")
            .arg("/dev")
            .arg("-b")
            .arg("/proc")
            .arg("-b")
            .arg("/sys")
            .arg("-w")
            .arg("/root")
            .arg("--kill-on-exit")
            .arg("/sbin/apk")
            .arg("add")
            .arg("--no-cache")
            .arg("gcompat")
            .env_clear()
            .env("PATH", "/usr/sbin:/usr/bin:/sbin:/bin")
            .env("PROOT_TMP_DIR", self.layout.tmp_dir());

        let output = command.output().await.map_err(|e| {
            at(Phase::Configure)(ModelboxError::Launch(format!(
                "failed to run rootfs package manager: {e}"
            )))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(at(Phase::Configure)(ModelboxError::Launch(format!(
                "compat shim install failed (code {:?}): {}",
                output.status.code(),
                stderr.trim()
            ))));
        }
        debug!("compat shim installed");
        Ok(())
    }
}
