//! Sandbox filesystem layout.
//!
//! All paths live under one app-private root:
//!
//! ```text
//! <root>/
//! ├── bin/          # interposition + server binaries
//! ├── lib/          # library search path for the server
//! ├── home/         # working directory of the supervised process
//! ├── tmp/          # download scratch space
//! └── root/         # extracted rootfs (interposition/bootstrap strategies)
//!     ├── bin/sh    # idempotency marker
//!     └── etc/resolv.conf
//! ```
//!
//! State is derived entirely from filesystem presence checks; there is no
//! separate manifest file to fall out of sync.

use std::path::{Path, PathBuf};

use crate::errors::{ModelboxError, ModelboxResult};
use crate::runtime::constants::{dirs, files};
use crate::runtime::options::Strategy;

#[derive(Clone, Debug)]
pub struct SandboxLayout {
    root: PathBuf,
}

/// Snapshot of what the filesystem says is installed.
///
/// Invariant: `is_runtime_installed` implies `is_provisioned`. Enforced by
/// construction in [`SandboxLayout::state`], not stored anywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxState {
    pub root: PathBuf,
    pub is_provisioned: bool,
    pub is_runtime_installed: bool,
}

impl SandboxLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join(dirs::BIN_DIR)
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join(dirs::LIB_DIR)
    }

    /// Working directory for the supervised process.
    pub fn home_dir(&self) -> PathBuf {
        self.root.join(dirs::HOME_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(dirs::TMP_DIR)
    }

    /// Extracted root filesystem: `<root>/root`.
    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join(dirs::ROOT_DIR)
    }

    /// Interposition binary: `<root>/bin/proot`.
    pub fn interposition_bin(&self) -> PathBuf {
        self.bin_dir().join(files::INTERPOSITION_BIN)
    }

    /// Server binary: `<root>/bin/ollama`.
    pub fn server_bin(&self) -> PathBuf {
        self.bin_dir().join(files::SERVER_BIN)
    }

    /// Idempotency marker for rootfs-based strategies: `<root>/root/bin/sh`.
    pub fn rootfs_marker(&self) -> PathBuf {
        self.rootfs_dir().join(files::ROOTFS_MARKER)
    }

    /// DNS resolver config inside the interposition rootfs.
    pub fn resolv_conf(&self) -> PathBuf {
        self.rootfs_dir().join(files::RESOLV_CONF)
    }

    /// Recorded pid of the supervised server: `<root>/server.pid`.
    pub fn pid_file(&self) -> PathBuf {
        self.root.join(files::PID_FILE)
    }

    /// The provisioning marker for a given strategy. Presence means
    /// `setup()` completed once and may skip all download/extraction work.
    pub fn provision_marker(&self, strategy: Strategy) -> PathBuf {
        match strategy {
            Strategy::Interposition | Strategy::Bootstrap => self.rootfs_marker(),
            Strategy::DirectBinary => self.server_bin(),
        }
    }

    /// Derive current state from filesystem presence checks.
    pub fn state(&self, strategy: Strategy) -> SandboxState {
        let is_provisioned = self.provision_marker(strategy).is_file();
        let is_runtime_installed = is_provisioned && self.server_bin().is_file();
        SandboxState {
            root: self.root.clone(),
            is_provisioned,
            is_runtime_installed,
        }
    }

    /// Create the directory skeleton. Idempotent.
    pub fn prepare(&self) -> ModelboxResult<()> {
        for dir in [
            self.root.clone(),
            self.bin_dir(),
            self.lib_dir(),
            self.home_dir(),
            self.tmp_dir(),
            self.rootfs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                ModelboxError::Storage(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Full reset: recursive delete of everything under the root. The only
    /// operation that destroys sandbox state.
    pub fn reset(&self) -> ModelboxResult<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|e| {
                ModelboxError::Storage(format!(
                    "failed to reset sandbox {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
