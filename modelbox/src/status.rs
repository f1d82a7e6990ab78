//! Failure classification and the last-error register.
//!
//! Callers branch on a small fixed set of stable codes rather than on raw
//! error strings. Every failure crossing the runtime boundary is converted
//! here into one of those codes.

use std::sync::Mutex;

use crate::errors::{ModelboxError, Prerequisite};
use crate::runtime::constants::MANUAL_INSTALL_HINT;

/// Provisioning/supervision phase a failure is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RootfsDownload,
    RootfsExtract,
    Configure,
    ServerDownload,
    ServerInstall,
    Launch,
    Readiness,
}

impl Phase {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::RootfsDownload => "downloading root filesystem",
            Self::RootfsExtract => "extracting root filesystem",
            Self::Configure => "configuring sandbox",
            Self::ServerDownload => "downloading server binary",
            Self::ServerInstall => "installing server binary",
            Self::Launch => "launching server",
            Self::Readiness => "waiting for server readiness",
        }
    }
}

/// Stable, UI-actionable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// Interposition binary absent at launch time.
    InterpositionMissing,
    /// Server binary absent at launch time.
    BinaryMissing,
    /// Root filesystem marker absent at launch time.
    RootfsMissing,
    /// Network failure during a download (either HTTP status or transport).
    DownloadFailed,
    /// Corrupt/unsupported archive, or a traversal attempt.
    ArchiveInvalid,
    /// Process creation failed.
    LaunchFailed,
    /// Process alive but never answered within the attempt budget.
    Timeout,
    /// Process exited before readiness was observed.
    ProcessExited,
    /// Setup/install was cancelled by the caller.
    Cancelled,
    Internal,
}

impl FailureCode {
    /// Remediation hint rendered next to the failure. Always includes the
    /// manual escape hatch for codes where the automated path may never
    /// succeed.
    pub fn remediation(&self) -> String {
        match self {
            Self::DownloadFailed => "check network connectivity and retry setup".to_string(),
            Self::ArchiveInvalid | Self::RootfsMissing | Self::InterpositionMissing => {
                format!("retry setup; if it keeps failing, {MANUAL_INSTALL_HINT}")
            }
            Self::BinaryMissing => {
                format!("reinstall the server binary; alternatively {MANUAL_INSTALL_HINT}")
            }
            Self::LaunchFailed | Self::ProcessExited | Self::Timeout => {
                format!("inspect the captured server output; alternatively {MANUAL_INSTALL_HINT}")
            }
            Self::Cancelled => "retry setup to resume".to_string(),
            Self::Internal => format!("report this failure; meanwhile {MANUAL_INSTALL_HINT}"),
        }
    }
}

/// One classified failure. Overwritten on every attempt; this is a
/// last-error register, not a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: FailureCode,
    pub phase: Phase,
    pub message: String,
}

/// Map a failure at `phase` onto its stable code.
pub fn classify(phase: Phase, error: &ModelboxError) -> ErrorRecord {
    let code = match error {
        ModelboxError::HttpStatus { .. } | ModelboxError::Transport(_) => {
            FailureCode::DownloadFailed
        }
        ModelboxError::Archive(_) | ModelboxError::PathTraversal(_) => FailureCode::ArchiveInvalid,
        ModelboxError::MissingPrerequisite(Prerequisite::InterpositionBinary) => {
            FailureCode::InterpositionMissing
        }
        ModelboxError::MissingPrerequisite(Prerequisite::ServerBinary) => {
            FailureCode::BinaryMissing
        }
        ModelboxError::MissingPrerequisite(Prerequisite::RootFilesystem) => {
            FailureCode::RootfsMissing
        }
        ModelboxError::Launch(_) => FailureCode::LaunchFailed,
        ModelboxError::ReadinessTimeout { .. } => FailureCode::Timeout,
        ModelboxError::ProcessExited { .. } => FailureCode::ProcessExited,
        ModelboxError::Cancelled => FailureCode::Cancelled,
        ModelboxError::Storage(_) | ModelboxError::Internal(_) => FailureCode::Internal,
    };
    ErrorRecord {
        code,
        phase,
        message: error.to_string(),
    }
}

/// Single-slot last-error state shared between the runtime and its caller.
#[derive(Debug, Default)]
pub struct LastError {
    slot: Mutex<Option<ErrorRecord>>,
}

impl LastError {
    pub fn record(&self, record: ErrorRecord) {
        *self.lock() = Some(record);
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn get(&self) -> Option<ErrorRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ErrorRecord>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Tri-state server status. Never a fourth, ambiguous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Reachable over its loopback listener.
    Running,
    /// Installed but not currently answering.
    Stopped,
    /// Provisioning has not completed.
    NotInstalled,
}
