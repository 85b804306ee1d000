//! Error taxonomy for UI actions and whole-run failures.

use thiserror::Error;

/// Failure of a single UI action against the live view.
///
/// Per-node variants (`NotFound`, `NotVisible`, `Disabled`, `Timeout`,
/// `Stale`, `Unreachable`) are caught at the sibling level and skipped.
/// `SessionLost` escalates to session recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("no element matches {0}")]
    NotFound(String),
    #[error("element is not visible: {0}")]
    NotVisible(String),
    #[error("element is disabled: {0}")]
    Disabled(String),
    #[error("stale element reference (located at epoch {held}, view is at epoch {current})")]
    Stale { held: u64, current: u64 },
    #[error("timed out after {ms}ms waiting for {what}")]
    Timeout { what: String, ms: u64 },
    #[error("view closed or detached")]
    SessionLost,
    #[error("all click tiers failed for {0}")]
    Unreachable(String),
    #[error("download did not complete within {0}ms")]
    DownloadTimeout(u64),
    #[error("driver error: {0}")]
    Driver(String),
}

impl ActionError {
    /// Short snake_case tag used in manifests and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::NotFound(_) => "not_found",
            ActionError::NotVisible(_) => "not_visible",
            ActionError::Disabled(_) => "disabled",
            ActionError::Stale { .. } => "stale",
            ActionError::Timeout { .. } => "timeout",
            ActionError::SessionLost => "session_lost",
            ActionError::Unreachable(_) => "unreachable",
            ActionError::DownloadTimeout(_) => "download_timeout",
            ActionError::Driver(_) => "failed",
        }
    }

    pub fn is_session_lost(&self) -> bool {
        matches!(self, ActionError::SessionLost)
    }

    pub(crate) fn timeout(what: impl Into<String>, ms: u64) -> Self {
        ActionError::Timeout {
            what: what.into(),
            ms,
        }
    }
}

/// Failure that ends a whole run.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("session could not be re-established after {attempts} attempts: {last}")]
    SessionUnrecoverable { attempts: u32, last: String },
    #[error("failed to bootstrap the application view: {0}")]
    Bootstrap(#[source] ActionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
