//! modelbox provisions and supervises a local AI inference server inside a
//! restricted execution environment: app-private storage only, no privileged
//! chroot, binaries executable only from the sandbox's own directories.
//!
//! The flow is: resolve the CPU architecture, download and extract the
//! runtime artifacts for the configured strategy, install the server binary,
//! launch it with a scrubbed environment, and poll its HTTP endpoint until
//! it is ready. Every failure is classified into a small set of stable codes
//! a caller can act on.
//!
//! [`LocalRuntime`] is the façade; the submodules are usable on their own.

pub mod api;
pub mod arch;
pub mod archive;
pub mod errors;
pub mod fetch;
pub mod provision;
pub mod runtime;
pub mod status;
pub mod supervisor;

pub use errors::{ModelboxError, ModelboxResult, Prerequisite};
pub use provision::{EventSender, ProvisionEvent};
pub use runtime::{LocalRuntime, RuntimeOptions, SandboxState, Strategy};
pub use status::{ErrorRecord, FailureCode, Phase, ServerStatus};

use std::sync::Once;

static LOG_INIT: Once = Once::new();

/// Install a global tracing subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
