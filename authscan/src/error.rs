//! Error types for the authscan orchestration core
use serde::Serialize;
use std::fmt;

use crate::credentials::CredentialError;
use crate::scan_session::ScanSessionError;
use crate::session_store::StoreError;
use crate::wizard::WizardStep;

/// Category of a workflow error.
///
/// Only the categories for which [`ErrorKind::blocks_progress`] is true are
/// surfaced to the user as blocking; the rest are recovered locally or only
/// logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Missing or malformed target / login URL, or an operation issued in the wrong step
    InvalidInput,
    /// No login form found on the login page
    Detection,
    /// Required credential fields left empty
    CredentialValidation,
    /// Login test failed
    Authentication,
    /// Temporary auth context consumed or expired before scan start
    SessionExpired,
    /// Service refused to start the scan, or an accepted scan could not be recorded
    ScanStart,
    /// Network hiccup during a poll tick
    PollingTransient,
    /// Service reported terminal failure
    ScanFailed,
    /// Stop request failed at the network layer
    StopAcknowledge,
    /// Scan stopped by the user
    Cancelled,
    /// Durable session slot could not be read or written
    Storage,
}

impl ErrorKind {
    /// Whether errors of this kind are user-visible and block progress.
    #[must_use]
    pub fn blocks_progress(&self) -> bool {
        matches!(
            self,
            ErrorKind::Detection
                | ErrorKind::Authentication
                | ErrorKind::ScanStart
                | ErrorKind::ScanFailed
        )
    }
}

/// The last error recorded by the wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors returned by wizard operations
#[derive(thiserror::Error, Debug)]
pub enum WizardError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation '{operation}' is not allowed in the {step} step")]
    WrongStep {
        operation: &'static str,
        step: WizardStep,
    },

    #[error("Login form detection failed: {0}")]
    Detection(String),

    #[error("Missing values for required fields: {}", missing.join(", "))]
    CredentialValidation { missing: Vec<String> },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Login session expired, please test the login again")]
    SessionExpired,

    #[error("Scan could not be started: {0}")]
    ScanStart(String),

    #[error("Scan {scan_id} was stopped because it could not be recorded: {source}")]
    NotRecorded {
        scan_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl WizardError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            WizardError::InvalidInput(_) | WizardError::WrongStep { .. } => ErrorKind::InvalidInput,
            WizardError::Detection(_) => ErrorKind::Detection,
            WizardError::CredentialValidation { .. } => ErrorKind::CredentialValidation,
            WizardError::Authentication(_) => ErrorKind::Authentication,
            WizardError::SessionExpired => ErrorKind::SessionExpired,
            WizardError::ScanStart(_) | WizardError::NotRecorded { .. } => ErrorKind::ScanStart,
            WizardError::ScanFailed(_) => ErrorKind::ScanFailed,
            WizardError::Store(_) => ErrorKind::Storage,
        }
    }

    /// Snapshot of this error for `WizardState::last_error`.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

impl From<ScanSessionError> for WizardError {
    fn from(err: ScanSessionError) -> Self {
        match err {
            ScanSessionError::SessionExpired => WizardError::SessionExpired,
            ScanSessionError::Start(message) => WizardError::ScanStart(message),
            ScanSessionError::NotRecorded { scan_id, source } => {
                WizardError::NotRecorded { scan_id, source }
            }
        }
    }
}

/// Top-level error type for the authscan binary
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// Scan service API error
    #[error("Scan service error: {0}")]
    Api(#[from] authscan_platform::ApiError),

    /// Wizard workflow error
    #[error("{0}")]
    Wizard(#[from] WizardError),

    /// Session store error
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Credential argument error
    #[error("{0}")]
    Credential(#[from] CredentialError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for authscan binary operations
pub type Result<T> = std::result::Result<T, AppError>;
