//! Archive extraction for the three package families the installer meets:
//! gzip+tar runtime images, zip bootstrap prefixes, and ar-wrapped OS
//! packages with an xz- or gzip-compressed inner tar.
//!
//! Every format routes entry paths through [`normalize_entry_path`]; an
//! entry that would resolve outside the target directory is rejected, never
//! written. Extraction always truncates on create, so re-extracting over a
//! partial previous attempt fully overwrites it.

mod package;
mod tarball;
mod zipfile;

pub use package::extract_package;
pub use tarball::{extract_single_entry, extract_tar_gz};
pub use zipfile::extract_zip;

use std::path::{Component, Path, PathBuf};

use crate::errors::{ModelboxError, ModelboxResult};

/// Supported archive families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// gzip-compressed tar (rootfs images, server release archives).
    TarGz,
    /// zip (bootstrap prefix bundles).
    Zip,
    /// ar container holding `data.tar.xz` or `data.tar.gz` (OS packages).
    Package,
}

/// Extract `archive` into `target_dir` according to `format`.
pub fn extract(archive: &Path, target_dir: &Path, format: ArchiveFormat) -> ModelboxResult<()> {
    match format {
        ArchiveFormat::TarGz => extract_tar_gz(archive, target_dir),
        ArchiveFormat::Zip => extract_zip(archive, target_dir),
        ArchiveFormat::Package => extract_package(archive, target_dir),
    }
}

/// Normalize an archive entry path to a relative path with no root, prefix,
/// or unresolved `..` components. Returns an error if the path would escape
/// the extraction root.
pub(crate) fn normalize_entry_path(path: &Path) -> ModelboxResult<PathBuf> {
    let mut components = Vec::new();
    for comp in path.components() {
        match comp {
            Component::RootDir | Component::Prefix(_) => continue,
            Component::CurDir => {}
            Component::ParentDir => {
                if components.pop().is_none() {
                    return Err(ModelboxError::PathTraversal(path.to_path_buf()));
                }
            }
            Component::Normal(c) => components.push(c.to_os_string()),
        }
    }
    Ok(components.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_path() {
        assert_eq!(
            normalize_entry_path(Path::new("usr/bin/sh")).unwrap(),
            PathBuf::from("usr/bin/sh")
        );
    }

    #[test]
    fn test_normalize_strips_root_and_curdir() {
        assert_eq!(
            normalize_entry_path(Path::new("/usr/./bin")).unwrap(),
            PathBuf::from("usr/bin")
        );
    }

    #[test]
    fn test_normalize_resolves_internal_parent() {
        assert_eq!(
            normalize_entry_path(Path::new("a/b/../c")).unwrap(),
            PathBuf::from("a/c")
        );
    }

    #[test]
    fn test_normalize_rejects_escape() {
        assert!(matches!(
            normalize_entry_path(Path::new("../../evil")),
            Err(ModelboxError::PathTraversal(_))
        ));
        assert!(matches!(
            normalize_entry_path(Path::new("a/../../evil")),
            Err(ModelboxError::PathTraversal(_))
        ));
    }
}
