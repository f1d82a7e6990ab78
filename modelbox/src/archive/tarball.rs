//! Streaming gzip+tar extraction.

use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::{debug, trace};

use crate::errors::{ModelboxError, ModelboxResult};

use super::normalize_entry_path;

/// Extract a gzip-compressed tar into `target_dir`, preserving executable
/// bits recorded in entry modes.
pub fn extract_tar_gz(archive_path: &Path, target_dir: &Path) -> ModelboxResult<()> {
    let file = open(archive_path)?;
    unpack_tar(GzDecoder::new(io::BufReader::new(file)), target_dir, None)
}

/// Unpack a tar stream into `dest`. `strip_prefix` removes a recorded
/// install prefix from every entry before re-rooting (OS package format).
pub(super) fn unpack_tar<R: Read>(
    reader: R,
    dest: &Path,
    strip_prefix: Option<&Path>,
) -> ModelboxResult<()> {
    fs::create_dir_all(dest).map_err(|e| {
        ModelboxError::Storage(format!("failed to create {}: {}", dest.display(), e))
    })?;

    let mut archive = Archive::new(reader);
    for entry in archive
        .entries()
        .map_err(|e| ModelboxError::Archive(format!("tar read error: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| ModelboxError::Archive(format!("tar entry error: {e}")))?;
        let raw_path = entry
            .path()
            .map_err(|e| ModelboxError::Archive(format!("tar path error: {e}")))?
            .into_owned();

        let mut normalized = normalize_entry_path(&raw_path)?;
        if let Some(prefix) = strip_prefix {
            match normalized.strip_prefix(prefix) {
                Ok(stripped) => normalized = stripped.to_path_buf(),
                // Entries outside the recorded prefix (control files,
                // metadata) have no place in the sandbox.
                Err(_) => {
                    trace!(path = %raw_path.display(), "skipping entry outside install prefix");
                    continue;
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            continue;
        }

        let full_path = dest.join(&normalized);
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().unwrap_or(0o644);

        if matches!(
            entry_type,
            EntryType::Directory
                | EntryType::Regular
                | EntryType::GNUSparse
                | EntryType::Symlink
                | EntryType::Link
        ) {
            prepare_entry_site(dest, &normalized, &full_path)?;
        }

        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&full_path).map_err(|e| {
                    ModelboxError::Storage(format!(
                        "failed to create {}: {}",
                        full_path.display(),
                        e
                    ))
                })?;
            }
            EntryType::Regular | EntryType::GNUSparse => {
                write_regular(&mut entry, &full_path, mode)?;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(|e| ModelboxError::Archive(format!("tar link error: {e}")))?
                    .ok_or_else(|| {
                        ModelboxError::Archive(format!(
                            "symlink without target: {}",
                            raw_path.display()
                        ))
                    })?;
                if full_path.symlink_metadata().is_ok() {
                    let _ = fs::remove_file(&full_path);
                }
                std::os::unix::fs::symlink(&target, &full_path).map_err(|e| {
                    ModelboxError::Storage(format!(
                        "failed to create symlink {}: {}",
                        full_path.display(),
                        e
                    ))
                })?;
            }
            EntryType::Link => {
                let target = entry
                    .link_name()
                    .map_err(|e| ModelboxError::Archive(format!("tar link error: {e}")))?
                    .ok_or_else(|| {
                        ModelboxError::Archive(format!(
                            "hardlink without target: {}",
                            raw_path.display()
                        ))
                    })?;
                // Hardlink targets go through the same traversal guard.
                let target = dest.join(normalize_entry_path(&target)?);
                if full_path.symlink_metadata().is_ok() {
                    let _ = fs::remove_file(&full_path);
                }
                fs::hard_link(&target, &full_path).map_err(|e| {
                    ModelboxError::Storage(format!(
                        "failed to create hardlink {}: {}",
                        full_path.display(),
                        e
                    ))
                })?;
            }
            EntryType::XGlobalHeader | EntryType::XHeader => {
                trace!(path = %raw_path.display(), "ignoring PAX header entry");
            }
            other => {
                // Device nodes and FIFOs cannot exist in app-private
                // storage; the server never reads them.
                debug!(path = %raw_path.display(), ?other, "skipping unsupported entry type");
            }
        }
    }
    Ok(())
}

/// Scan a gzip+tar for one entry, stream only that entry to `dest_file`,
/// and stop without unpacking the rest of the archive.
pub fn extract_single_entry(
    archive_path: &Path,
    entry_path: &Path,
    dest_file: &Path,
    force_exec: bool,
) -> ModelboxResult<()> {
    let file = open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(io::BufReader::new(file)));

    for entry in archive
        .entries()
        .map_err(|e| ModelboxError::Archive(format!("tar read error: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| ModelboxError::Archive(format!("tar entry error: {e}")))?;
        let raw_path = entry
            .path()
            .map_err(|e| ModelboxError::Archive(format!("tar path error: {e}")))?
            .into_owned();
        if normalize_entry_path(&raw_path)? != entry_path {
            continue;
        }

        let mode = entry.header().mode().unwrap_or(0o755);
        write_regular(&mut entry, dest_file, mode)?;
        if force_exec {
            let mut perms = fs::metadata(dest_file)
                .map_err(|e| {
                    ModelboxError::Storage(format!("stat {} failed: {}", dest_file.display(), e))
                })?
                .permissions();
            perms.set_mode(perms.mode() | 0o755);
            fs::set_permissions(dest_file, perms).map_err(|e| {
                ModelboxError::Storage(format!("chmod {} failed: {}", dest_file.display(), e))
            })?;
        }
        return Ok(());
    }

    Err(ModelboxError::Archive(format!(
        "entry {} not found in {}",
        entry_path.display(),
        archive_path.display()
    )))
}

fn open(path: &Path) -> ModelboxResult<fs::File> {
    fs::File::open(path).map_err(|e| {
        ModelboxError::Storage(format!("failed to open {}: {}", path.display(), e))
    })
}

/// Create the parent chain for `rel` under `dest` and clear the write site.
///
/// Entry paths are normalized before this runs, but an earlier entry can
/// plant a symlink whose target lies outside the extraction root; any write
/// through it would escape. No ancestor of an entry may be a symlink, and a
/// symlink occupying the write site itself is removed rather than followed.
fn prepare_entry_site(dest: &Path, rel: &Path, full_path: &Path) -> ModelboxResult<()> {
    if let Some(parent) = rel.parent() {
        let mut current = dest.to_path_buf();
        for comp in parent.components() {
            current.push(comp);
            match current.symlink_metadata() {
                Ok(meta) => {
                    if meta.file_type().is_symlink() {
                        return Err(ModelboxError::PathTraversal(rel.to_path_buf()));
                    }
                }
                Err(_) => {
                    fs::create_dir_all(&current).map_err(|e| {
                        ModelboxError::Storage(format!(
                            "failed to create {}: {}",
                            current.display(),
                            e
                        ))
                    })?;
                }
            }
        }
    }
    if full_path
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        fs::remove_file(full_path).map_err(|e| {
            ModelboxError::Storage(format!("failed to remove {}: {}", full_path.display(), e))
        })?;
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> ModelboxResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ModelboxError::Storage(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}

fn write_regular<R: Read>(entry: &mut R, path: &Path, mode: u32) -> ModelboxResult<()> {
    ensure_parent(path)?;
    // Truncate-on-create: a retried extraction fully overwrites whatever a
    // previous aborted attempt left here.
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode & 0o777)
        .open(path)
        .map_err(|e| {
            ModelboxError::Storage(format!("failed to create {}: {}", path.display(), e))
        })?;
    io::copy(entry, &mut file).map_err(|e| {
        ModelboxError::Storage(format!("failed to write {}: {}", path.display(), e))
    })?;
    // The mode passed at open time is masked by the process umask; reassert
    // it so recorded executable bits survive.
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777)).map_err(|e| {
        ModelboxError::Storage(format!("chmod {} failed: {}", path.display(), e))
    })?;
    Ok(())
}
