//! Zip extraction for bootstrap prefix bundles.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use tracing::trace;

use crate::errors::{ModelboxError, ModelboxResult};

use super::normalize_entry_path;

/// Extract a zip archive into `target_dir`, preserving recorded unix modes.
pub fn extract_zip(archive_path: &Path, target_dir: &Path) -> ModelboxResult<()> {
    let file = fs::File::open(archive_path).map_err(|e| {
        ModelboxError::Storage(format!("failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut archive = zip::ZipArchive::new(io::BufReader::new(file))
        .map_err(|e| ModelboxError::Archive(format!("zip open error: {e}")))?;

    fs::create_dir_all(target_dir).map_err(|e| {
        ModelboxError::Storage(format!("failed to create {}: {}", target_dir.display(), e))
    })?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ModelboxError::Archive(format!("zip entry error: {e}")))?;

        let normalized = normalize_entry_path(Path::new(entry.name()))?;
        if normalized.as_os_str().is_empty() {
            continue;
        }
        let full_path = target_dir.join(&normalized);

        if entry.is_dir() {
            fs::create_dir_all(&full_path).map_err(|e| {
                ModelboxError::Storage(format!("failed to create {}: {}", full_path.display(), e))
            })?;
            continue;
        }

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ModelboxError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let mode = entry.unix_mode().unwrap_or(0o644);
        trace!(path = %normalized.display(), mode = format_args!("{mode:o}"), "zip entry");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode & 0o777)
            .open(&full_path)
            .map_err(|e| {
                ModelboxError::Storage(format!("failed to create {}: {}", full_path.display(), e))
            })?;
        io::copy(&mut entry, &mut file).map_err(|e| {
            ModelboxError::Storage(format!("failed to write {}: {}", full_path.display(), e))
        })?;
        fs::set_permissions(&full_path, fs::Permissions::from_mode(mode & 0o777)).map_err(
            |e| ModelboxError::Storage(format!("chmod {} failed: {}", full_path.display(), e)),
        )?;
    }
    Ok(())
}
