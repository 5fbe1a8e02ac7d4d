//! Authscan - resumable orchestration of authenticated web security scans
//!
//! The wizard walks a user from target configuration through login-form
//! detection and a login test to a running scan, polls the scan service for
//! progress, merges partial scanner results into one report, and records the
//! active scan so it can be resumed after a restart.
pub mod aggregator;
pub mod backend;
pub mod cancellation;
pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod polling;
pub mod scan_session;
pub mod session_store;
pub mod wizard;

#[cfg(test)]
pub mod test_utils;

pub use aggregator::{
    MergeOutcome, Report, ResultAggregator, ScannerSlot, StatusSnapshot, Terminal, merge,
};
pub use backend::ScanBackend;
pub use cancellation::{CancelOutcome, CancellationManager, STOPPED_BY_USER};
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use credentials::{CredentialArg, CredentialError, parse_credential_arg};
pub use error::{AppError, ErrorInfo, ErrorKind, Result, WizardError};
pub use polling::{PollEvent, PollState, PollingConfig, PollingEngine, StartOutcome};
pub use scan_session::{ScanSession, ScanSessionError, SessionStatus, TempAuthContext};
pub use session_store::{
    FileSessionStore, MemorySessionStore, PersistedSessionRecord, SessionStore, StoreError,
};
pub use wizard::{LoginOutcome, ScanUpdate, WizardController, WizardState, WizardStep};
