//! Runtime configuration.

use std::path::PathBuf;

use crate::runtime::constants::{dirs, server, urls};

/// Provisioning strategy, chosen once at configuration time.
///
/// The variants are mutually exclusive: a runtime is constructed with one
/// and never switches. They exist because different host generations impose
/// different constraints, not as simultaneous features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Syscall-interposition binary + minimal Linux rootfs image. Needed
    /// where the server binary is linked against a different C library
    /// than the host provides.
    #[default]
    Interposition,
    /// Pre-built bootstrap prefix matching a known terminal-sandbox layout;
    /// its binaries target the host's native loader directly.
    Bootstrap,
    /// Download the server binary alone; hosts where it runs natively.
    DirectBinary,
}

/// Options for constructing a [`crate::runtime::LocalRuntime`].
///
/// URL fields are templates with an `{arch}` placeholder; tests override
/// them to point at local fixtures.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Sandbox root. Defaults to `<data dir>/.modelbox`.
    pub home_dir: PathBuf,

    pub strategy: Strategy,

    /// ABIs the host reports supporting, in the host's preference order.
    pub reported_abis: Vec<String>,

    /// Loopback listener the server is told to bind.
    pub listen_addr: String,

    pub interposition_url: String,
    pub rootfs_url: String,
    pub server_url: String,
    pub bootstrap_url: String,

    /// Whether the interposition strategy runs the rootfs package manager
    /// once to install the C-library compatibility shim. Disabled in tests,
    /// which have no interposition binary to run.
    pub install_compat_shim: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let base = host_data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            home_dir: base.join(dirs::MODELBOX_DIR),
            strategy: Strategy::default(),
            reported_abis: host_abis(),
            listen_addr: server::LISTEN_ADDR.to_string(),
            interposition_url: urls::INTERPOSITION_BINARY.to_string(),
            rootfs_url: urls::ROOTFS_IMAGE.to_string(),
            server_url: urls::SERVER_ARCHIVE.to_string(),
            bootstrap_url: urls::BOOTSTRAP_BUNDLE.to_string(),
            install_compat_shim: true,
        }
    }
}

impl RuntimeOptions {
    pub fn with_home_dir(mut self, home_dir: PathBuf) -> Self {
        self.home_dir = home_dir;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Base URL the supervised server answers on.
    pub fn server_base_url(&self) -> String {
        format!("http://{}", self.listen_addr)
    }
}

// `::dirs` names the crate; the plain path is shadowed by the constants
// module imported above.
fn host_data_dir() -> Option<PathBuf> {
    ::dirs::data_dir()
}

/// ABIs of the build target, used when the host does not report its own.
fn host_abis() -> Vec<String> {
    let abi = match std::env::consts::ARCH {
        "aarch64" => "arm64-v8a",
        "arm" => "armeabi-v7a",
        "x86_64" => "x86_64",
        "x86" => "x86",
        other => other,
    };
    vec![abi.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = RuntimeOptions::default();
        assert_eq!(opts.strategy, Strategy::Interposition);
        assert!(opts.home_dir.ends_with(dirs::MODELBOX_DIR));
        assert!(opts.server_base_url().starts_with("http://127.0.0.1"));
        assert!(opts.install_compat_shim);
    }

    #[test]
    fn test_builder_overrides() {
        let opts = RuntimeOptions::default()
            .with_home_dir(PathBuf::from("/tmp/mb"))
            .with_strategy(Strategy::Bootstrap);
        assert_eq!(opts.home_dir, PathBuf::from("/tmp/mb"));
        assert_eq!(opts.strategy, Strategy::Bootstrap);
    }
}
