//! Lifecycle of one scan attempt.

use authscan_platform::{ApiError, StartScanRequest, TestLoginResponse};
use chrono::{DateTime, Utc};
use log::{info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ErrorInfo, ErrorKind};
use crate::session_store::{PersistedSessionRecord, SessionStore, StoreError};

/// Proof of a successful login test, consumed by [`ScanSession::start`].
///
/// Its expiry is enforced by the scan service only. It is never persisted.
#[derive(Debug)]
pub struct TempAuthContext {
    session_token: SecretString,
}

impl TempAuthContext {
    pub fn new(session_token: SecretString) -> Self {
        Self { session_token }
    }

    /// Build the context from a login test answer, if it authenticated and
    /// carried a session id.
    pub fn from_login(response: &TestLoginResponse) -> Option<Self> {
        if !response.authenticated {
            return None;
        }
        response
            .temp_session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| Self::new(SecretString::from(id.to_string())))
    }
}

/// Lifecycle of a scan as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
        )
    }
}

/// Errors raised while starting a scan
#[derive(thiserror::Error, Debug)]
pub enum ScanSessionError {
    #[error("Login session expired")]
    SessionExpired,

    #[error("{0}")]
    Start(String),

    /// The service accepted the scan but it could not be recorded locally.
    /// A stop request has been sent for it.
    #[error("Scan {scan_id} was accepted but could not be recorded, so it was stopped: {source}")]
    NotRecorded {
        scan_id: String,
        #[source]
        source: StoreError,
    },
}

/// One accepted scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    scan_id: String,
    target: String,
    started_at: DateTime<Utc>,
    status: SessionStatus,
}

impl ScanSession {
    /// Ask the service to start a scan and record it in `store`.
    ///
    /// The store is written before this returns `Ok`, so a restart right
    /// after the service accepted the scan can still resume it.
    pub async fn start<B, S>(
        backend: &B,
        store: &S,
        target: &str,
        login_url: &str,
        auth: TempAuthContext,
    ) -> Result<Self, ScanSessionError>
    where
        B: crate::backend::ScanBackend,
        S: SessionStore + ?Sized,
    {
        let request = StartScanRequest {
            target_url: target.to_string(),
            login_url: login_url.to_string(),
            temp_session_id: auth.session_token.expose_secret().to_string(),
        };
        drop(auth);

        info!("🚀 Starting authenticated scan of {target}");
        let response = match backend.start_scan(request).await {
            Ok(response) => response,
            Err(ApiError::SessionExpired) => {
                warn!("⚠️  Scan service reports the login session has expired");
                return Err(ScanSessionError::SessionExpired);
            }
            Err(e) => return Err(ScanSessionError::Start(e.to_string())),
        };

        let session = Self {
            scan_id: response.scan_id,
            target: target.to_string(),
            started_at: Utc::now(),
            status: SessionStatus::Running,
        };
        if let Err(source) = store.set(&session.record()) {
            warn!(
                "⚠️  Scan {} accepted but not recorded, stopping it: {source}",
                session.scan_id
            );
            // nothing local refers to this scan any more
            let _ = stop_remote(backend, &session.scan_id).await;
            return Err(ScanSessionError::NotRecorded {
                scan_id: session.scan_id,
                source,
            });
        }

        info!("✅ Scan {} accepted", session.scan_id);
        Ok(session)
    }

    /// Rebuild a session from its persisted record.
    pub fn resume(record: PersistedSessionRecord) -> Self {
        Self {
            scan_id: record.scan_id,
            target: record.target,
            started_at: record.started_at,
            status: SessionStatus::Running,
        }
    }

    #[must_use]
    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn record(&self) -> PersistedSessionRecord {
        PersistedSessionRecord {
            scan_id: self.scan_id.clone(),
            target: self.target.clone(),
            started_at: self.started_at,
        }
    }

    /// Move to a terminal status and drop the persisted record.
    ///
    /// The status changes even if the store cannot be cleared.
    pub fn finish<S: SessionStore + ?Sized>(
        &mut self,
        status: SessionStatus,
        store: &S,
    ) -> Result<(), StoreError> {
        self.status = status;
        store.clear_matching(&self.scan_id).map(|_| ())
    }

    /// Ask the service to stop the scan. Best effort: the session is
    /// considered stopped whatever the service answers.
    ///
    /// The error describes why the service did not acknowledge the stop.
    pub async fn stop<B: crate::backend::ScanBackend>(
        &mut self,
        backend: &B,
    ) -> Result<(), ErrorInfo> {
        self.status = SessionStatus::Stopped;
        stop_remote(backend, &self.scan_id).await
    }
}

/// Send a stop request for `scan_id`. Failures are logged and returned, never
/// propagated as errors.
pub(crate) async fn stop_remote<B: crate::backend::ScanBackend>(
    backend: &B,
    scan_id: &str,
) -> Result<(), ErrorInfo> {
    let message = match backend.stop_scan(scan_id).await {
        Ok(response) if response.stopped => {
            match response.message {
                Some(message) => info!("⏹️  Stop request for scan {scan_id} acknowledged: {message}"),
                None => info!("⏹️  Stop request for scan {scan_id} acknowledged"),
            }
            return Ok(());
        }
        Ok(response) => format!(
            "service declined to stop scan {scan_id}: {}",
            response.message.as_deref().unwrap_or("no reason given")
        ),
        Err(e) if e.is_transport() => {
            format!("stop request for scan {scan_id} did not reach the service: {e}")
        }
        Err(e) => format!("stop request for scan {scan_id} failed: {e}"),
    };

    warn!("⚠️  {message}, stopping locally");
    Err(ErrorInfo::new(ErrorKind::StopAcknowledge, message))
}
