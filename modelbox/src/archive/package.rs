//! OS package extraction: an ar container wrapping `data.tar.xz` or
//! `data.tar.gz`, whose entries record an absolute install prefix that must
//! be stripped before re-rooting under the sandbox's own prefix.

use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;
use xz2::read::XzDecoder;

use crate::errors::{ModelboxError, ModelboxResult};
use crate::runtime::constants::PACKAGE_INSTALL_PREFIX;

use super::tarball::unpack_tar;

/// Unwrap the two container layers of an OS package and extract the inner
/// data tar into `target_dir`, re-rooted at the stripped install prefix.
pub fn extract_package(archive_path: &Path, target_dir: &Path) -> ModelboxResult<()> {
    let file = std::fs::File::open(archive_path).map_err(|e| {
        ModelboxError::Storage(format!("failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut container = ar::Archive::new(io::BufReader::new(file));

    while let Some(entry) = container.next_entry() {
        let entry = entry.map_err(|e| ModelboxError::Archive(format!("ar read error: {e}")))?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        debug!(name, "ar member");

        let strip = Path::new(PACKAGE_INSTALL_PREFIX);
        match name.as_str() {
            "data.tar.xz" => {
                return unpack_tar(XzDecoder::new(entry), target_dir, Some(strip));
            }
            "data.tar.gz" => {
                return unpack_tar(GzDecoder::new(entry), target_dir, Some(strip));
            }
            // debian-binary, control.tar.*: container metadata, skipped.
            _ => drain(entry)?,
        }
    }

    Err(ModelboxError::Archive(format!(
        "no data.tar.xz or data.tar.gz member in {}",
        archive_path.display()
    )))
}

fn drain<R: Read>(mut reader: R) -> ModelboxResult<()> {
    io::copy(&mut reader, &mut io::sink())
        .map_err(|e| ModelboxError::Archive(format!("ar member read error: {e}")))?;
    Ok(())
}
