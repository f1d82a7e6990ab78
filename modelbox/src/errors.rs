//! Error taxonomy for provisioning and supervision.
//!
//! Every fallible path in the crate returns [`ModelboxResult`]. The variants
//! deliberately distinguish the failure points the UI must branch on:
//! HTTP-status vs transport failure, a corrupt archive vs a traversal
//! attempt, and which prerequisite file was missing at launch time.

use std::path::PathBuf;

use thiserror::Error;

pub type ModelboxResult<T> = Result<T, ModelboxError>;

/// Prerequisite files checked before the server process is spawned.
///
/// Each missing prerequisite maps to a different remediation ("retry setup"
/// vs "reinstall the binary"), so they are not collapsed into one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    /// The user-space syscall-interposition binary (interposition strategy).
    InterpositionBinary,
    /// The inference server binary itself.
    ServerBinary,
    /// The provisioned root filesystem marker.
    RootFilesystem,
}

impl Prerequisite {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::InterpositionBinary => "interposition binary",
            Self::ServerBinary => "server binary",
            Self::RootFilesystem => "root filesystem",
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelboxError {
    /// Server answered with a non-success status.
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Connection-level failure: DNS, refused, reset, truncated body.
    #[error("transport error: {0}")]
    Transport(String),

    /// Corrupt or unsupported archive container.
    #[error("archive error: {0}")]
    Archive(String),

    /// An archive entry whose path would resolve outside the target dir.
    #[error("archive entry escapes extraction root: {}", .0.display())]
    PathTraversal(PathBuf),

    /// A prerequisite file was missing at launch time.
    #[error("missing prerequisite: {}", .0.describe())]
    MissingPrerequisite(Prerequisite),

    /// Process creation itself failed.
    #[error("launch error: {0}")]
    Launch(String),

    /// Process alive but never answered within the attempt budget.
    #[error("server not ready after {attempts} probe attempts")]
    ReadinessTimeout { attempts: u32 },

    /// The server terminated before readiness was observed. `None` means
    /// the OS reported death by signal without an exit code.
    #[error("server process exited early (code {code:?})")]
    ProcessExited { code: Option<i32> },

    /// Local filesystem failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cooperative cancellation observed mid-operation.
    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ModelboxError {
    /// True for the two network-shaped variants.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::HttpStatus { .. } | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(
            ModelboxError::HttpStatus {
                status: 503,
                url: "http://x".into()
            }
            .is_network()
        );
        assert!(ModelboxError::Transport("reset".into()).is_network());
        assert!(!ModelboxError::Archive("bad magic".into()).is_network());
    }

    #[test]
    fn test_display_names_prerequisite() {
        let e = ModelboxError::MissingPrerequisite(Prerequisite::RootFilesystem);
        assert!(e.to_string().contains("root filesystem"));
    }
}
