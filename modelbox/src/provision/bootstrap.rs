//! Bootstrap strategy: a pre-built minimal userland prefix matching a known
//! terminal-sandbox layout. Its binaries target the host's native loader, so
//! no interposition is needed; the trade-off is a symlink manifest to
//! resolve (zip carries none, and creating real symlinks would need
//! privileges the sandbox does not have) and executable bits to reapply.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{self, ArchiveFormat};
use crate::errors::{ModelboxError, ModelboxResult};
use crate::fetch::DownloadProgress;
use crate::runtime::constants::{files, phase_bounds};
use crate::status::Phase;

use super::{Provisioner, ProvisionError, Reporter, at};

impl Provisioner {
    pub(super) async fn provision_bootstrap(
        &self,
        reporter: &mut Reporter,
    ) -> Result<(), ProvisionError> {
        let url = self
            .options
            .bootstrap_url
            .replace("{arch}", self.arch.bootstrap_tag());
        let archive_path = self.layout.tmp_dir().join("bootstrap.zip");

        reporter.emit(
            Phase::RootfsDownload,
            phase_bounds::ROOTFS_DOWNLOAD_START,
            "downloading bootstrap prefix",
        );
        {
            let mut on_progress = |progress: &DownloadProgress| {
                reporter.download(
                    Phase::RootfsDownload,
                    phase_bounds::ROOTFS_DOWNLOAD_START,
                    phase_bounds::ROOTFS_DOWNLOAD_END,
                    progress,
                    "bootstrap prefix",
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
            "extracting bootstrap prefix",
        );
        let prefix_dir = self.layout.rootfs_dir();
        let archive = archive_path.clone();
        tokio::task::spawn_blocking(move || {
            archive::extract(&archive, &prefix_dir, ArchiveFormat::Zip)
        })
        .await
        .map_err(|e| {
            at(Phase::RootfsExtract)(ModelboxError::Internal(format!(
                "extraction task failed: {e}"
            )))
        })?
        .map_err(at(Phase::RootfsExtract))?;
        let _ = std::fs::remove_file(&archive_path);
        reporter.emit(
            Phase::RootfsExtract,
            phase_bounds::ROOTFS_EXTRACT_END,
            "bootstrap prefix extracted",
        );

        reporter.emit(
            Phase::Configure,
            phase_bounds::ROOTFS_EXTRACT_END,
            "resolving symlink manifest",
        );
        let prefix_dir = self.layout.rootfs_dir();
        tokio::task::spawn_blocking(move || -> ModelboxResult<()> {
            resolve_symlink_manifest(&prefix_dir)?;
            apply_executable_bits(&prefix_dir)
        })
        .await
        .map_err(|e| {
            at(Phase::Configure)(ModelboxError::Internal(format!(
                "configure task failed: {e}"
            )))
        })?
        .map_err(at(Phase::Configure))?;

        if !self.layout.rootfs_marker().is_file() {
            return Err(at(Phase::Configure)(ModelboxError::Archive(format!(
                "bootstrap prefix did not provide {}",
                files::ROOTFS_MARKER
            ))));
        }
        reporter.emit(
            Phase::Configure,
            phase_bounds::CONFIGURE_END,
            "bootstrap prefix configured",
        );
        info!(prefix = %self.layout.rootfs_dir().display(), "bootstrap environment ready");
        Ok(())
    }
}

/// Resolve the textual symlink manifest shipped at the prefix root.
///
/// Each line reads `target←link`, where `link` is relative to the prefix
/// root and `target` is relative to the link's own directory. True symlinks
/// are unavailable without elevated privilege, so the target file is copied
/// over the link path instead. Missing targets are skipped with a warning;
/// a dangling manifest entry must not abort provisioning.
fn resolve_symlink_manifest(prefix: &Path) -> ModelboxResult<()> {
    let manifest = prefix.join(files::SYMLINK_MANIFEST);
    if !manifest.is_file() {
        debug!("no symlink manifest in bootstrap prefix");
        return Ok(());
    }

    let contents = std::fs::read_to_string(&manifest).map_err(|e| {
        ModelboxError::Storage(format!("failed to read {}: {}", manifest.display(), e))
    })?;

    let mut resolved = 0usize;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((target, link)) = line.split_once('←') else {
            warn!(line, "malformed symlink manifest entry");
            continue;
        };

        let link_path = prefix.join(link.trim_start_matches("./"));
        let target_path = match link_path.parent() {
            Some(parent) => parent.join(target),
            None => prefix.join(target),
        };
        if !target_path.is_file() {
            warn!(
                target = %target_path.display(),
                link = %link_path.display(),
                "symlink target missing, skipping"
            );
            continue;
        }
        if let Some(parent) = link_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ModelboxError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::copy(&target_path, &link_path).map_err(|e| {
            ModelboxError::Storage(format!(
                "failed to copy {} to {}: {}",
                target_path.display(),
                link_path.display(),
                e
            ))
        })?;
        resolved += 1;
    }
    debug!(resolved, "symlink manifest resolved");
    Ok(())
}

/// Recursively reapply executable bits across the prefix. Zip archives
/// produced on other platforms routinely drop unix modes, and a prefix full
/// of non-executable binaries is useless.
fn apply_executable_bits(prefix: &Path) -> ModelboxResult<()> {
    for entry in WalkDir::new(prefix).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| {
            ModelboxError::Storage(format!("failed to stat {}: {}", entry.path().display(), e))
        })?;
        let mut perms = metadata.permissions();
        let mode = perms.mode();
        if mode & 0o111 != 0o111 {
            perms.set_mode(mode | 0o111);
            std::fs::set_permissions(entry.path(), perms).map_err(|e| {
                ModelboxError::Storage(format!(
                    "chmod {} failed: {}",
                    entry.path().display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use zip::write::SimpleFileOptions;

    use crate::fetch::Fetcher;
    use crate::runtime::layout::SandboxLayout;
    use crate::runtime::options::{RuntimeOptions, Strategy};

    use super::super::tests::{FakeFetcher, gz_tar};

    fn bootstrap_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let entries: [(&str, &[u8], u32); 3] = [
            ("bin/dash", b"ELF-dash", 0o644),
            ("lib/libc.so", b"ELF-libc", 0o644),
            (
                files::SYMLINK_MANIFEST,
                b"dash\xE2\x86\x90./bin/sh\nmissing\xE2\x86\x90./bin/gone\nmalformed-line\n",
                0o644,
            ),
        ];
        for (path, content, mode) in entries {
            writer
                .start_file(path, SimpleFileOptions::default().unix_permissions(mode))
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_bootstrap_fresh_install() {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = RuntimeOptions::default()
            .with_home_dir(tmp.path().join("sandbox"))
            .with_strategy(Strategy::Bootstrap);
        options.bootstrap_url = "http://fixture/bootstrap-{arch}.zip".into();
        options.server_url = "http://fixture/server-{arch}.tgz".into();

        let fetcher = Arc::new(FakeFetcher::new(vec![
            ("bootstrap", bootstrap_zip()),
            (
                "server",
                gz_tar(&[(files::SERVER_BIN_IN_ARCHIVE, b"ELF-server", 0o644)]),
            ),
        ]));
        let layout = SandboxLayout::new(options.home_dir.clone());
        let p = super::super::Provisioner::new(
            layout.clone(),
            options,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        );

        p.setup(None).await.unwrap();

        // The manifest entry materialized bin/sh as a copy of bin/dash.
        let sh = layout.rootfs_marker();
        assert_eq!(std::fs::read(&sh).unwrap(), b"ELF-dash");
        let mode = std::fs::metadata(&sh).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);

        assert!(layout.server_bin().is_file());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_manifest_resolution_skips_dangling_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = tmp.path();
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        std::fs::write(prefix.join("bin/dash"), b"ELF").unwrap();
        std::fs::write(
            prefix.join(files::SYMLINK_MANIFEST),
            "dash←./bin/sh\nnowhere←./bin/broken\n",
        )
        .unwrap();

        resolve_symlink_manifest(prefix).unwrap();
        assert!(prefix.join("bin/sh").is_file());
        assert!(!prefix.join("bin/broken").exists());
    }

    #[test]
    fn test_executable_bits_applied_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = tmp.path();
        std::fs::create_dir_all(prefix.join("libexec/deep")).unwrap();
        std::fs::write(prefix.join("libexec/deep/helper"), b"ELF").unwrap();
        std::fs::set_permissions(
            prefix.join("libexec/deep/helper"),
            std::fs::Permissions::from_mode(0o600),
        )
        .unwrap();

        apply_executable_bits(prefix).unwrap();
        let mode = std::fs::metadata(prefix.join("libexec/deep/helper"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
