//! Fixed names, download sources, and progress phase boundaries.

/// Directory structure constants under the sandbox root.
pub mod dirs {
    /// Base directory name for modelbox data inside app-private storage.
    pub const MODELBOX_DIR: &str = ".modelbox";

    /// Executables owned by the sandbox (interposition binary, server binary).
    pub const BIN_DIR: &str = "bin";

    /// Shared libraries the server may need.
    pub const LIB_DIR: &str = "lib";

    /// Working directory for the supervised process.
    pub const HOME_DIR: &str = "home";

    /// Scratch space for downloads before they are installed.
    pub const TMP_DIR: &str = "tmp";

    /// Extracted root filesystem (interposition and bootstrap strategies).
    pub const ROOT_DIR: &str = "root";
}

/// Well-known file names.
pub mod files {
    /// Interposition binary name under `bin/`.
    pub const INTERPOSITION_BIN: &str = "proot";

    /// Server binary name under `bin/`.
    pub const SERVER_BIN: &str = "ollama";

    /// Server binary path inside the release archive.
    pub const SERVER_BIN_IN_ARCHIVE: &str = "bin/ollama";

    /// Idempotency marker inside the extracted rootfs: a shell at a fixed
    /// relative path. Present iff extraction completed.
    pub const ROOTFS_MARKER: &str = "bin/sh";

    /// DNS resolver configuration written into the interposition rootfs.
    pub const RESOLV_CONF: &str = "etc/resolv.conf";

    /// Textual symlink manifest shipped in bootstrap prefix bundles.
    pub const SYMLINK_MANIFEST: &str = "SYMLINKS.txt";

    /// Pid of the supervised server, for reaching it from a later process.
    pub const PID_FILE: &str = "server.pid";
}

/// Versioned, architecture-qualified download sources. `{arch}` is replaced
/// with the per-artifact tag from [`crate::arch::CpuArch`].
pub mod urls {
    pub const INTERPOSITION_BINARY: &str =
        "https://github.com/proot-me/proot/releases/download/v5.4.0/proot-v5.4.0-{arch}-static";

    pub const ROOTFS_IMAGE: &str =
        "https://dl-cdn.alpinelinux.org/alpine/v3.20/releases/{arch}/alpine-minirootfs-3.20.3-{arch}.tar.gz";

    pub const SERVER_ARCHIVE: &str =
        "https://github.com/ollama/ollama/releases/download/v0.5.7/ollama-linux-{arch}.tgz";

    pub const BOOTSTRAP_BUNDLE: &str =
        "https://github.com/termux/termux-packages/releases/latest/download/bootstrap-{arch}.zip";
}

/// Server network constants.
pub mod server {
    /// Fixed loopback listener for the supervised server.
    pub const LISTEN_ADDR: &str = "127.0.0.1:11434";

    /// Model-listing endpoint used as the readiness probe.
    pub const TAGS_PATH: &str = "/api/tags";

    /// Environment variable the server reads its listen address from.
    pub const HOST_ENV: &str = "OLLAMA_HOST";

    /// Subcommand that runs the server in the foreground.
    pub const SERVE_ARG: &str = "serve";
}

/// Fixed boundaries for the single monotonic 0-100 provisioning scale, so a
/// caller can render one continuous bar across heterogeneous sub-steps.
pub mod phase_bounds {
    pub const ROOTFS_DOWNLOAD_START: u8 = 0;
    pub const ROOTFS_DOWNLOAD_END: u8 = 40;
    pub const ROOTFS_EXTRACT_END: u8 = 55;
    pub const CONFIGURE_END: u8 = 60;
    pub const SERVER_DOWNLOAD_END: u8 = 90;
    pub const SERVER_INSTALL_END: u8 = 100;
}

/// Supervision limits.
pub mod limits {
    use std::time::Duration;

    /// Stderr prefix retained from the child. A prefix, not a suffix: the
    /// first lines of a crash-looping child carry the original cause.
    pub const STDERR_TAIL_BYTES: usize = 8 * 1024;

    /// Grace period between SIGTERM and SIGKILL.
    pub const STOP_GRACE: Duration = Duration::from_secs(5);

    /// Settling delay between stop() and start() in restart().
    pub const RESTART_SETTLE: Duration = Duration::from_millis(500);

    /// Wall-clock cadence for download progress callbacks.
    pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

    /// Per-probe timeout for readiness checks.
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Probe attempts allowed before a start is declared timed out.
    pub const READINESS_ATTEMPTS: u32 = 60;

    /// Fixed delay between readiness probes.
    pub const READINESS_INTERVAL: Duration = Duration::from_millis(500);
}

/// Absolute install prefix recorded in OS package archives, stripped before
/// re-rooting entries under the sandbox's own prefix.
pub const PACKAGE_INSTALL_PREFIX: &str = "data/data/com.termux/files/usr";

/// Manual-fallback command equivalent to the automated install, surfaced
/// with terminal failures so the user always has an escape hatch.
pub const MANUAL_INSTALL_HINT: &str =
    "run `pkg install ollama && ollama serve` in a terminal sandbox app";
