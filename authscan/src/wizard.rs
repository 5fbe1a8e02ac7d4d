//! The five-step scan wizard.
//!
//! ```text
//! Configure ──detect/submit──▶ Credentials ──test login──▶ Verify ──start──▶ Scanning ──complete──▶ Results
//!     ▲                            ▲                          │                 │
//!     │                            └──── session expired ─────┘                 │
//!     └──────────────────────────── scan failed ───────────────────────────────┘
//! ```
//!
//! [`WizardController`] is the single actor that owns the wizard state, the
//! active [`ScanSession`] and its [`ResultAggregator`]. The polling engine
//! only sends events into the controller's channel; they are applied when
//! the caller pumps [`WizardController::next_update`] or
//! [`WizardController::drain`].
//!
//! Each operation is legal in one step only. Calling it elsewhere fails with
//! [`WizardError::WrongStep`] and changes nothing.

use authscan_platform::{
    CredentialEntry, DetectLoginResponse, FieldDescriptor, FormDescriptor, ScannerId,
    TestLoginRequest,
};
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::aggregator::{MergeOutcome, Report, ResultAggregator, StatusSnapshot};
use crate::backend::ScanBackend;
use crate::cancellation::{CancelOutcome, CancellationManager, STOPPED_BY_USER};
use crate::error::{ErrorInfo, ErrorKind, WizardError};
use crate::polling::{PollEvent, PollingConfig, PollingEngine};
use crate::scan_session::{ScanSession, SessionStatus, TempAuthContext};
use crate::session_store::SessionStore;

/// Wizard step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WizardStep {
    #[default]
    Configure,
    Credentials,
    Verify,
    Scanning,
    Results,
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WizardStep::Configure => "Configure",
            WizardStep::Credentials => "Credentials",
            WizardStep::Verify => "Verify",
            WizardStep::Scanning => "Scanning",
            WizardStep::Results => "Results",
        };
        f.write_str(name)
    }
}

/// Everything the user entered or the wizard learned so far.
///
/// Credential values live here only between entry and a successful login
/// test; they are dropped (and zeroed) on that transition and never leave
/// memory.
#[derive(Debug, Default)]
pub struct WizardState {
    step: WizardStep,
    target: Option<Url>,
    login_url: Option<Url>,
    detected_form: Option<FormDescriptor>,
    selected_fields: Vec<FieldDescriptor>,
    credential_values: BTreeMap<String, SecretString>,
    submit_selector: Option<String>,
    last_error: Option<ErrorInfo>,
}

impl WizardState {
    #[must_use]
    pub fn step(&self) -> WizardStep {
        self.step
    }

    #[must_use]
    pub fn target(&self) -> Option<&Url> {
        self.target.as_ref()
    }

    #[must_use]
    pub fn login_url(&self) -> Option<&Url> {
        self.login_url.as_ref()
    }

    #[must_use]
    pub fn detected_form(&self) -> Option<&FormDescriptor> {
        self.detected_form.as_ref()
    }

    /// Selected fields, in form order.
    #[must_use]
    pub fn selected_fields(&self) -> &[FieldDescriptor] {
        &self.selected_fields
    }

    #[must_use]
    pub fn is_selected(&self, selector: &str) -> bool {
        self.selected_fields.iter().any(|f| f.selector == selector)
    }

    #[must_use]
    pub fn credential_value(&self, selector: &str) -> Option<&SecretString> {
        self.credential_values.get(selector)
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.credential_values.is_empty()
    }

    #[must_use]
    pub fn submit_selector(&self) -> Option<&str> {
        self.submit_selector.as_deref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    fn clear_credentials(&mut self) {
        // SecretString zeroes its buffer on drop
        self.credential_values.clear();
    }

    /// Selected fields that have no non-empty value.
    fn missing_values(&self) -> Vec<String> {
        self.selected_fields
            .iter()
            .filter(|field| {
                self.credential_values
                    .get(&field.selector)
                    .is_none_or(|value| value.expose_secret().is_empty())
            })
            .map(|field| field.selector.clone())
            .collect()
    }
}

/// Result of a login test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated { post_login_url: Option<String> },
    Failed { message: String },
}

/// What a poll event changed, as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUpdate {
    Progress {
        phase: String,
        progress: u8,
        message: String,
        newly_arrived: Vec<ScannerId>,
    },
    Completed,
    Failed {
        reason: String,
    },
}

/// Drives one scan from configuration to results.
pub struct WizardController<B: ScanBackend, S: SessionStore> {
    backend: Arc<B>,
    store: Arc<S>,
    polling: PollingEngine<B>,
    state: WizardState,
    auth: Option<TempAuthContext>,
    session: Option<ScanSession>,
    aggregator: Option<ResultAggregator>,
    events_tx: mpsc::UnboundedSender<PollEvent>,
    events_rx: mpsc::UnboundedReceiver<PollEvent>,
}

impl<B: ScanBackend, S: SessionStore> WizardController<B, S> {
    /// Create a controller. If `store` holds an active scan, the controller
    /// starts at the Scanning step and polls that scan right away; otherwise
    /// it starts at Configure.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        backend: Arc<B>,
        store: Arc<S>,
        polling_config: PollingConfig,
    ) -> Result<Self, WizardError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let polling = PollingEngine::new(Arc::clone(&backend), polling_config);
        let record = store.get()?;

        let mut controller = Self {
            backend,
            store,
            polling,
            state: WizardState::default(),
            auth: None,
            session: None,
            aggregator: None,
            events_tx,
            events_rx,
        };

        if let Some(record) = record {
            info!(
                "🔄 Resuming scan {} of {} started at {}",
                record.scan_id,
                record.target,
                record.started_at.to_rfc3339()
            );
            match Url::parse(&record.target) {
                Ok(target) => controller.state.target = Some(target),
                Err(e) => debug!("Persisted target is not a valid URL: {e}"),
            }
            controller.enter_scanning(ScanSession::resume(record));
        }

        Ok(controller)
    }

    #[must_use]
    pub fn state(&self) -> &WizardState {
        &self.state
    }

    #[must_use]
    pub fn step(&self) -> WizardStep {
        self.state.step
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.state.last_error.as_ref()
    }

    #[must_use]
    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    /// The report of the current or last scan.
    #[must_use]
    pub fn report(&self) -> Option<&Report> {
        self.aggregator.as_ref().map(ResultAggregator::report)
    }

    /// Whether a scan is running and results are still expected.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state.step == WizardStep::Scanning
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.status() == SessionStatus::Running)
    }

    /// Whether the user stopped the scan. Progress is halted in that state.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.status() == SessionStatus::Stopped)
    }

    /// Set the target and login page.
    pub fn configure(&mut self, target: &str, login_url: &str) -> Result<(), WizardError> {
        self.require_step("configure", WizardStep::Configure)?;

        let target = match parse_web_url("target", target) {
            Ok(url) => url,
            Err(e) => return Err(self.fail(e)),
        };
        let login_url = match parse_web_url("login URL", login_url) {
            Ok(url) => url,
            Err(e) => return Err(self.fail(e)),
        };

        debug!("Configured target {target} with login page {login_url}");
        self.state.target = Some(target);
        self.state.login_url = Some(login_url);
        self.state.detected_form = None;
        self.state.last_error = None;
        Ok(())
    }

    /// Ask the service to detect login forms on the configured login page.
    ///
    /// Does not advance; pass the chosen form to
    /// [`submit_detection_result`](Self::submit_detection_result).
    pub async fn detect_login_form(&mut self) -> Result<DetectLoginResponse, WizardError> {
        self.require_step("detect_login_form", WizardStep::Configure)?;
        let Some(login_url) = self.state.login_url.clone() else {
            return Err(self.fail(WizardError::InvalidInput(
                "login URL is not configured".to_string(),
            )));
        };

        info!("🔍 Detecting login form on {login_url}");
        let response = match self.backend.detect_login_fields(login_url.as_str()).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(WizardError::Detection(e.to_string()))),
        };

        if !response.success || response.forms.is_empty() {
            let reason = response
                .error
                .clone()
                .unwrap_or_else(|| "no login form found on the page".to_string());
            return Err(self.fail(WizardError::Detection(reason)));
        }
        for warning in &response.warnings {
            warn!("⚠️  {warning}");
        }

        info!("✅ Found {} form(s)", response.forms.len());
        Ok(response)
    }

    /// Accept a detected form and move to Credentials.
    ///
    /// Every field of the form starts selected; the submit selector is taken
    /// from the form's submit button when it has one.
    pub fn submit_detection_result(&mut self, form: FormDescriptor) -> Result<(), WizardError> {
        self.require_step("submit_detection_result", WizardStep::Configure)?;
        if self.state.target.is_none() || self.state.login_url.is_none() {
            return Err(self.fail(WizardError::InvalidInput(
                "target and login URL must be configured first".to_string(),
            )));
        }
        if form.fields.is_empty() {
            return Err(self.fail(WizardError::Detection(
                "the selected form has no input fields".to_string(),
            )));
        }

        self.state.selected_fields = form.fields.clone();
        self.state.submit_selector = form.submit_button.as_ref().map(|b| b.selector.clone());
        self.state.detected_form = Some(form);
        self.state.clear_credentials();
        self.state.last_error = None;
        self.state.step = WizardStep::Credentials;
        Ok(())
    }

    /// Select or deselect a detected field. Returns whether it is now selected.
    ///
    /// Deselecting a field drops its value.
    pub fn toggle_field(&mut self, selector: &str) -> Result<bool, WizardError> {
        self.require_step("toggle_field", WizardStep::Credentials)?;
        let Some(form) = self.state.detected_form.as_ref() else {
            return Err(self.fail(WizardError::InvalidInput("no detected form".to_string())));
        };

        if self.state.is_selected(selector) {
            self.state.selected_fields.retain(|f| f.selector != selector);
            self.state.credential_values.remove(selector);
            return Ok(false);
        }

        if form.field(selector).is_none() {
            return Err(self.fail(WizardError::InvalidInput(format!(
                "unknown field '{selector}'"
            ))));
        }

        // keep form order
        let selected: Vec<FieldDescriptor> = form
            .fields
            .iter()
            .filter(|f| f.selector == selector || self.state.is_selected(&f.selector))
            .cloned()
            .collect();
        self.state.selected_fields = selected;
        Ok(true)
    }

    /// Set the value typed into a selected field.
    pub fn set_credential(
        &mut self,
        selector: &str,
        value: SecretString,
    ) -> Result<(), WizardError> {
        self.require_step("set_credential", WizardStep::Credentials)?;
        if !self.state.is_selected(selector) {
            return Err(self.fail(WizardError::InvalidInput(format!(
                "field '{selector}' is not selected"
            ))));
        }
        self.state
            .credential_values
            .insert(selector.to_string(), value);
        Ok(())
    }

    /// Override the submit button selector. An empty selector clears it.
    pub fn set_submit_selector(&mut self, selector: &str) -> Result<(), WizardError> {
        self.require_step("set_submit_selector", WizardStep::Credentials)?;
        let selector = selector.trim();
        self.state.submit_selector = (!selector.is_empty()).then(|| selector.to_string());
        Ok(())
    }

    /// Submit the entered credentials once.
    ///
    /// On success the credentials are cleared and the wizard moves to Verify.
    /// On failure it stays at Credentials with the values untouched.
    pub async fn test_login(&mut self) -> Result<LoginOutcome, WizardError> {
        self.require_step("test_login", WizardStep::Credentials)?;
        let Some(login_url) = self.state.login_url.clone() else {
            return Err(self.fail(WizardError::InvalidInput(
                "login URL is not configured".to_string(),
            )));
        };
        if self.state.selected_fields.is_empty() {
            return Err(self.fail(WizardError::InvalidInput(
                "no fields selected".to_string(),
            )));
        }
        let missing = self.state.missing_values();
        if !missing.is_empty() {
            return Err(self.fail(WizardError::CredentialValidation { missing }));
        }

        let credentials = self
            .state
            .selected_fields
            .iter()
            .filter_map(|field| {
                self.state
                    .credential_values
                    .get(&field.selector)
                    .map(|value| CredentialEntry {
                        selector: field.selector.clone(),
                        value: value.clone(),
                        input_type: field.input_type.clone(),
                    })
            })
            .collect();
        let request = TestLoginRequest {
            login_url: login_url.to_string(),
            credentials,
            submit_button: self.state.submit_selector.clone(),
        };

        info!("🔐 Testing login on {login_url}");
        let response = match self.backend.test_login(request).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(WizardError::Authentication(e.to_string()))),
        };

        match TempAuthContext::from_login(&response) {
            Some(auth) => {
                self.state.clear_credentials();
                self.auth = Some(auth);
                self.state.last_error = None;
                self.state.step = WizardStep::Verify;
                info!("✅ Login succeeded");
                Ok(LoginOutcome::Authenticated {
                    post_login_url: response.post_login_url,
                })
            }
            None => {
                let message = response
                    .error_message
                    .unwrap_or_else(|| "login was not accepted".to_string());
                warn!("❌ Login failed: {message}");
                self.state.last_error = Some(ErrorInfo::new(ErrorKind::Authentication, &message));
                Ok(LoginOutcome::Failed { message })
            }
        }
    }

    /// Start the scan with the login session from the last login test.
    ///
    /// The login session is consumed by the attempt. If it is missing or the
    /// service reports it expired, the wizard returns to Credentials. On
    /// success the wizard state is discarded and polling starts.
    pub async fn start_scan(&mut self) -> Result<String, WizardError> {
        self.require_step("start_scan", WizardStep::Verify)?;
        let (Some(target), Some(login_url)) =
            (self.state.target.clone(), self.state.login_url.clone())
        else {
            return Err(self.fail(WizardError::InvalidInput(
                "target and login URL must be configured first".to_string(),
            )));
        };
        let Some(auth) = self.auth.take() else {
            self.state.step = WizardStep::Credentials;
            return Err(self.fail(WizardError::SessionExpired));
        };

        let session = match ScanSession::start(
            self.backend.as_ref(),
            self.store.as_ref(),
            target.as_str(),
            login_url.as_str(),
            auth,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                let err = WizardError::from(e);
                if matches!(err, WizardError::SessionExpired) {
                    self.state.step = WizardStep::Credentials;
                }
                return Err(self.fail(err));
            }
        };

        let scan_id = session.scan_id().to_string();
        self.state = WizardState {
            target: Some(target),
            login_url: Some(login_url),
            ..WizardState::default()
        };
        self.enter_scanning(session);
        Ok(scan_id)
    }

    /// Wait for the next poll event and apply it.
    ///
    /// Returns `None` once no more results are expected: the scan completed,
    /// failed, was stopped, or none is running.
    pub async fn next_update(&mut self) -> Option<ScanUpdate> {
        while self.is_scanning() {
            let event = self.events_rx.recv().await?;
            if let Some(update) = self.observe(event) {
                return Some(update);
            }
        }
        None
    }

    /// Apply every event already received without waiting.
    pub fn drain(&mut self) -> Vec<ScanUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(update) = self.observe(event) {
                updates.push(update);
            }
        }
        updates
    }

    /// Apply one poll event. Events for another scan, or arriving after the
    /// scan ended, are dropped.
    pub fn observe(&mut self, event: PollEvent) -> Option<ScanUpdate> {
        if !self.is_scanning()
            || self
                .session
                .as_ref()
                .is_none_or(|s| s.scan_id() != event.scan_id())
        {
            debug!("Dropping stale poll event for scan {}", event.scan_id());
            return None;
        }

        match event {
            PollEvent::Snapshot { snapshot, .. } => self.apply_snapshot(&snapshot),
            PollEvent::Transient { error, .. } => {
                // non-blocking; replaced by the next snapshot
                self.state.last_error = Some(error);
                None
            }
            PollEvent::Exhausted { attempts, .. } => Some(self.fail_scan(format!(
                "no final status after {attempts} status requests"
            ))),
        }
    }

    fn apply_snapshot(&mut self, snapshot: &StatusSnapshot) -> Option<ScanUpdate> {
        if self
            .state
            .last_error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::PollingTransient)
        {
            self.state.last_error = None;
        }
        let aggregator = self.aggregator.as_mut()?;
        match aggregator.apply(snapshot) {
            MergeOutcome::Updated { newly_arrived } => {
                for id in &newly_arrived {
                    info!("📥 {id} results arrived");
                }
                Some(ScanUpdate::Progress {
                    phase: snapshot.phase.clone(),
                    progress: snapshot.progress,
                    message: snapshot.message.clone(),
                    newly_arrived,
                })
            }
            MergeOutcome::Completed => {
                self.finish_session(SessionStatus::Completed);
                self.state.last_error = None;
                self.state.step = WizardStep::Results;
                Some(ScanUpdate::Completed)
            }
            MergeOutcome::Failed(reason) => Some(self.fail_scan(reason)),
            MergeOutcome::Ignored => None,
        }
    }

    fn fail_scan(&mut self, reason: String) -> ScanUpdate {
        self.polling.stop();
        self.finish_session(SessionStatus::Failed);
        let err = WizardError::ScanFailed(reason.clone());
        warn!("❌ {err}");
        self.state.last_error = Some(err.info());
        self.state.step = WizardStep::Configure;
        ScanUpdate::Failed { reason }
    }

    fn finish_session(&mut self, status: SessionStatus) {
        if let Some(session) = self.session.as_mut()
            && let Err(e) = session.finish(status, self.store.as_ref())
        {
            warn!("⚠️  Could not clear session record: {e}");
        }
    }

    /// Stop the running scan. A no-op when no scan is running.
    pub async fn stop(&mut self) -> CancelOutcome {
        let Some(session) = self.session.as_mut() else {
            return CancelOutcome::NotActive;
        };

        let outcome = CancellationManager::new(self.backend.as_ref(), self.store.as_ref())
            .with_polling(&self.polling)
            .stop(session)
            .await;

        if matches!(outcome, CancelOutcome::Stopped { .. }) {
            self.state.last_error = Some(ErrorInfo::new(ErrorKind::Cancelled, STOPPED_BY_USER));
        }
        outcome
    }

    /// Discard everything and return to Configure. A running scan is stopped
    /// first.
    pub async fn reset(&mut self) {
        if self.is_scanning() {
            self.stop().await;
        }
        self.polling.stop();
        self.state = WizardState::default();
        self.auth = None;
        self.session = None;
        self.aggregator = None;
        while self.events_rx.try_recv().is_ok() {}
        debug!("Wizard reset");
    }

    fn enter_scanning(&mut self, session: ScanSession) {
        let scan_id = session.scan_id().to_string();
        self.aggregator = Some(ResultAggregator::new(&scan_id));
        self.session = Some(session);
        self.state.step = WizardStep::Scanning;

        let events_tx = self.events_tx.clone();
        self.polling.start(scan_id, move |event| {
            // the receiver lives as long as the controller
            let _ = events_tx.send(event);
        });
    }

    fn require_step(&self, operation: &'static str, step: WizardStep) -> Result<(), WizardError> {
        if self.state.step == step {
            Ok(())
        } else {
            Err(WizardError::WrongStep {
                operation,
                step: self.state.step,
            })
        }
    }

    fn fail(&mut self, err: WizardError) -> WizardError {
        self.state.last_error = Some(err.info());
        err
    }
}

fn parse_web_url(what: &str, value: &str) -> Result<Url, WizardError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WizardError::InvalidInput(format!("{what} is required")));
    }
    let url = Url::parse(value)
        .map_err(|e| WizardError::InvalidInput(format!("{what} '{value}' is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(WizardError::InvalidInput(format!(
            "{what} must use http or https, got '{scheme}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::{MemorySessionStore, PersistedSessionRecord};
    use crate::test_utils::{
        FakeBackend, UnwritableStore, completed, failed, login_form_detection, login_ok,
        login_rejected, running,
    };
    use authscan_platform::{ApiError, StartScanResponse};
    use chrono::Utc;

    type Controller = WizardController<FakeBackend, MemorySessionStore>;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn open(backend: &Arc<FakeBackend>, store: &MemorySessionStore) -> Controller {
        WizardController::open(
            Arc::clone(backend),
            Arc::new(store.clone()),
            PollingConfig::default(),
        )
        .unwrap()
    }

    async fn at_credentials(backend: &Arc<FakeBackend>, store: &MemorySessionStore) -> Controller {
        let mut wizard = open(backend, store);
        wizard
            .configure("https://app.example.com", "https://app.example.com/login")
            .unwrap();
        let detected = wizard.detect_login_form().await.unwrap();
        let form = detected.best_form().unwrap().clone();
        wizard.submit_detection_result(form).unwrap();
        wizard
    }

    async fn at_verify(backend: &Arc<FakeBackend>, store: &MemorySessionStore) -> Controller {
        let mut wizard = at_credentials(backend, store).await;
        wizard.toggle_field("#remember").unwrap();
        wizard.set_credential("#email", secret("user@example.com")).unwrap();
        wizard.set_credential("#password", secret("hunter2")).unwrap();
        backend.push_login(login_ok("tmp-1"));
        wizard.test_login().await.unwrap();
        wizard
    }

    fn backend() -> Arc<FakeBackend> {
        Arc::new(FakeBackend::new().with_detection(login_form_detection()))
    }

    #[test]
    fn test_step_display() {
        assert_eq!(WizardStep::Configure.to_string(), "Configure");
        assert_eq!(WizardStep::Results.to_string(), "Results");
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_urls() {
        let backend = backend();
        let mut wizard = open(&backend, &MemorySessionStore::new());

        let err = wizard.configure("", "https://a/login").unwrap_err();
        assert!(matches!(err, WizardError::InvalidInput(_)));
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::InvalidInput);

        let err = wizard.configure("https://a", "ftp://a/login").unwrap_err();
        assert!(matches!(err, WizardError::InvalidInput(_)));
        assert_eq!(wizard.step(), WizardStep::Configure);
        assert!(wizard.state().target().is_none());

        wizard.configure("https://a", "https://a/login").unwrap();
        assert!(wizard.last_error().is_none());
        assert_eq!(wizard.step(), WizardStep::Configure);
    }

    #[tokio::test]
    async fn test_operations_are_gated_by_step() {
        let backend = backend();
        let mut wizard = open(&backend, &MemorySessionStore::new());

        assert!(matches!(
            wizard.toggle_field("#email"),
            Err(WizardError::WrongStep { operation: "toggle_field", step: WizardStep::Configure })
        ));
        assert!(matches!(
            wizard.start_scan().await,
            Err(WizardError::WrongStep { .. })
        ));
        assert!(wizard.last_error().is_none());
    }

    #[tokio::test]
    async fn test_detection_failure_stays_at_configure() {
        let backend = Arc::new(FakeBackend::new());
        let mut wizard = open(&backend, &MemorySessionStore::new());
        wizard.configure("https://a", "https://a/login").unwrap();

        let err = wizard.detect_login_form().await.unwrap_err();
        assert!(matches!(err, WizardError::Detection(_)));
        assert_eq!(wizard.step(), WizardStep::Configure);
        assert!(wizard.last_error().unwrap().kind.blocks_progress());
    }

    #[tokio::test]
    async fn test_submit_detection_preselects_fields() {
        let backend = backend();
        let wizard = at_credentials(&backend, &MemorySessionStore::new()).await;

        assert_eq!(wizard.step(), WizardStep::Credentials);
        assert_eq!(wizard.state().selected_fields().len(), 3);
        assert_eq!(wizard.state().submit_selector(), Some("button[type=submit]"));
    }

    #[tokio::test]
    async fn test_toggle_field_keeps_form_order() {
        let backend = backend();
        let mut wizard = at_credentials(&backend, &MemorySessionStore::new()).await;

        wizard.set_credential("#email", secret("a@b.c")).unwrap();
        assert!(!wizard.toggle_field("#email").unwrap());
        assert!(wizard.state().credential_value("#email").is_none());
        assert!(wizard.set_credential("#email", secret("x")).is_err());

        assert!(wizard.toggle_field("#email").unwrap());
        let order: Vec<&str> = wizard
            .state()
            .selected_fields()
            .iter()
            .map(|f| f.selector.as_str())
            .collect();
        assert_eq!(order, vec!["#email", "#password", "#remember"]);

        assert!(wizard.toggle_field("#nope").is_err());
    }

    #[tokio::test]
    async fn test_login_requires_values_for_selected_fields() {
        let backend = backend();
        let mut wizard = at_credentials(&backend, &MemorySessionStore::new()).await;
        wizard.toggle_field("#remember").unwrap();
        wizard.set_credential("#email", secret("user@example.com")).unwrap();

        let err = wizard.test_login().await.unwrap_err();
        match err {
            WizardError::CredentialValidation { missing } => {
                assert_eq!(missing, vec!["#password".to_string()])
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(wizard.step(), WizardStep::Credentials);
        assert!(backend.login_calls().is_empty());
        assert!(!wizard.last_error().unwrap().kind.blocks_progress());
    }

    #[tokio::test]
    async fn test_successful_login_clears_credentials() {
        let backend = backend();
        let wizard = at_verify(&backend, &MemorySessionStore::new()).await;

        assert_eq!(wizard.step(), WizardStep::Verify);
        assert!(!wizard.state().has_credentials());

        let (values, submit) = &backend.login_calls()[0];
        assert_eq!(
            values,
            &vec![
                ("#email".to_string(), "user@example.com".to_string()),
                ("#password".to_string(), "hunter2".to_string()),
            ]
        );
        assert_eq!(submit.as_deref(), Some("button[type=submit]"));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_credentials() {
        let backend = backend();
        let mut wizard = at_credentials(&backend, &MemorySessionStore::new()).await;
        wizard.toggle_field("#remember").unwrap();
        wizard.set_credential("#email", secret("user@example.com")).unwrap();
        wizard.set_credential("#password", secret("wrong")).unwrap();
        backend.push_login(login_rejected("bad credentials"));

        let outcome = wizard.test_login().await.unwrap();

        assert_eq!(
            outcome,
            LoginOutcome::Failed {
                message: "bad credentials".to_string()
            }
        );
        assert_eq!(wizard.step(), WizardStep::Credentials);
        assert_eq!(
            wizard
                .state()
                .credential_value("#password")
                .map(|v| v.expose_secret().to_string()),
            Some("wrong".to_string())
        );
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::Authentication);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_scan_enters_scanning_and_polls() {
        let backend = backend();
        let store = MemorySessionStore::new();
        let mut wizard = at_verify(&backend, &store).await;
        backend.push_start(Ok(StartScanResponse {
            scan_id: "S1".to_string(),
        }));
        backend.push_status(Ok(running(40, &["zap"])));

        assert_eq!(wizard.start_scan().await.unwrap(), "S1");
        assert_eq!(wizard.step(), WizardStep::Scanning);
        assert_eq!(store.get().unwrap().unwrap().scan_id, "S1");
        assert!(wizard.state().detected_form().is_none());
        assert_eq!(backend.start_calls()[0].temp_session_id, "tmp-1");

        let update = wizard.next_update().await.unwrap();
        assert_eq!(
            update,
            ScanUpdate::Progress {
                phase: "zap".to_string(),
                progress: 40,
                message: "40%".to_string(),
                newly_arrived: vec![ScannerId::Zap],
            }
        );
        assert!(wizard.report().unwrap().has_arrived(ScannerId::Zap));
    }

    #[tokio::test]
    async fn test_start_scan_rejected_consumes_login_session() {
        let backend = backend();
        let store = MemorySessionStore::new();
        let mut wizard = at_verify(&backend, &store).await;
        backend.push_start(Err(ApiError::Rejected {
            status: 500,
            message: "scanner pool exhausted".to_string(),
        }));

        let err = wizard.start_scan().await.unwrap_err();
        assert!(matches!(err, WizardError::ScanStart(_)));
        assert_eq!(wizard.step(), WizardStep::Verify);
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::ScanStart);

        let err = wizard.start_scan().await.unwrap_err();
        assert!(matches!(err, WizardError::SessionExpired));
        assert_eq!(wizard.step(), WizardStep::Credentials);
        assert_eq!(backend.start_calls().len(), 1);
        assert_eq!(store.get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_unrecorded_scan_is_stopped_and_not_entered() {
        let backend = backend();
        let mut wizard = WizardController::open(
            Arc::clone(&backend),
            Arc::new(UnwritableStore),
            PollingConfig::default(),
        )
        .unwrap();
        wizard
            .configure("https://app.example.com", "https://app.example.com/login")
            .unwrap();
        let form = wizard.detect_login_form().await.unwrap().forms[0].clone();
        wizard.submit_detection_result(form).unwrap();
        wizard.toggle_field("#remember").unwrap();
        wizard.set_credential("#email", secret("user@example.com")).unwrap();
        wizard.set_credential("#password", secret("hunter2")).unwrap();
        backend.push_login(login_ok("tmp-1"));
        wizard.test_login().await.unwrap();
        backend.push_start(Ok(StartScanResponse {
            scan_id: "S1".to_string(),
        }));

        let err = wizard.start_scan().await.unwrap_err();

        assert!(matches!(&err, WizardError::NotRecorded { scan_id, .. } if scan_id == "S1"));
        assert_eq!(wizard.step(), WizardStep::Verify);
        assert!(wizard.session().is_none());
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::ScanStart);
        assert!(wizard.last_error().unwrap().kind.blocks_progress());
        assert_eq!(backend.stop_calls(), vec!["S1".to_string()]);
        assert!(backend.status_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_error_is_recorded_until_next_snapshot() {
        let backend = backend();
        let store = MemorySessionStore::new();
        let mut wizard = at_verify(&backend, &store).await;
        backend.push_start(Ok(StartScanResponse {
            scan_id: "S1".to_string(),
        }));
        backend.push_status(Err(ApiError::InvalidResponse("gateway timeout".to_string())));
        backend.push_status(Ok(running(40, &["zap"])));
        wizard.start_scan().await.unwrap();

        let update = wizard.observe(PollEvent::Transient {
            scan_id: "S1".to_string(),
            attempt: 1,
            error: ErrorInfo::new(ErrorKind::PollingTransient, "status request 1 failed"),
        });
        assert!(update.is_none());
        assert_eq!(wizard.step(), WizardStep::Scanning);
        assert_eq!(
            wizard.last_error().unwrap().kind,
            ErrorKind::PollingTransient
        );

        let update = wizard.next_update().await.unwrap();
        assert!(matches!(update, ScanUpdate::Progress { progress: 40, .. }));
        assert!(wizard.last_error().is_none());
        assert_eq!(backend.status_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_scan_moves_to_results() {
        let backend = backend();
        let store = MemorySessionStore::new();
        let mut wizard = at_verify(&backend, &store).await;
        backend.push_start(Ok(StartScanResponse {
            scan_id: "S1".to_string(),
        }));
        backend.push_status(Ok(running(40, &["zap"])));
        backend.push_status(Ok(completed(&["zap", "observatory"])));
        wizard.start_scan().await.unwrap();

        let mut updates = Vec::new();
        while let Some(update) = wizard.next_update().await {
            updates.push(update);
        }

        assert_eq!(updates.last(), Some(&ScanUpdate::Completed));
        assert_eq!(wizard.step(), WizardStep::Results);
        assert!(wizard.report().unwrap().is_complete());
        assert_eq!(store.get().unwrap(), None);
        assert_eq!(
            wizard.session().unwrap().status(),
            SessionStatus::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scan_reverts_to_configure() {
        let backend = backend();
        let store = MemorySessionStore::new();
        let mut wizard = at_verify(&backend, &store).await;
        backend.push_start(Ok(StartScanResponse {
            scan_id: "S1".to_string(),
        }));
        backend.push_status(Ok(failed("target unreachable")));
        wizard.start_scan().await.unwrap();

        let update = wizard.next_update().await.unwrap();
        assert_eq!(
            update,
            ScanUpdate::Failed {
                reason: "target unreachable".to_string()
            }
        );
        assert!(wizard.next_update().await.is_none());
        assert_eq!(wizard.step(), WizardStep::Configure);
        assert_eq!(wizard.last_error().unwrap().kind, ErrorKind::ScanFailed);
        assert!(wizard.report().unwrap().is_failed());
        assert_eq!(store.get().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_ceiling_fails_scan() {
        let backend = backend();
        let store = MemorySessionStore::with_record(PersistedSessionRecord {
            scan_id: "S1".to_string(),
            target: "https://app.example.com".to_string(),
            started_at: Utc::now(),
        });
        let mut wizard = WizardController::open(
            Arc::clone(&backend),
            Arc::new(store.clone()),
            PollingConfig::default().with_max_polls(2),
        )
        .unwrap();

        let mut last = None;
        while let Some(update) = wizard.next_update().await {
            last = Some(update);
        }

        assert!(matches!(last, Some(ScanUpdate::Failed { .. })));
        assert_eq!(wizard.step(), WizardStep::Configure);
        assert_eq!(backend.status_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_scan() {
        let backend = backend();
        let store = MemorySessionStore::new();
        let mut wizard = at_verify(&backend, &store).await;
        backend.push_start(Ok(StartScanResponse {
            scan_id: "S1".to_string(),
        }));
        wizard.start_scan().await.unwrap();
        wizard.next_update().await.unwrap();

        assert_eq!(wizard.stop().await, CancelOutcome::Stopped { acknowledged: true });
        assert!(wizard.is_aborted());
        assert_eq!(wizard.step(), WizardStep::Scanning);
        assert_eq!(
            wizard.last_error(),
            Some(&ErrorInfo::new(ErrorKind::Cancelled, "stopped by user"))
        );
        assert_eq!(store.get().unwrap(), None);
        assert!(wizard.next_update().await.is_none());

        assert_eq!(wizard.stop().await, CancelOutcome::NotActive);
        assert_eq!(backend.stop_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stops_running_scan() {
        let backend = backend();
        let store = MemorySessionStore::new();
        let mut wizard = at_verify(&backend, &store).await;
        backend.push_start(Ok(StartScanResponse {
            scan_id: "S1".to_string(),
        }));
        wizard.start_scan().await.unwrap();

        wizard.reset().await;

        assert_eq!(wizard.step(), WizardStep::Configure);
        assert!(wizard.session().is_none());
        assert!(wizard.report().is_none());
        assert!(wizard.state().target().is_none());
        assert_eq!(backend.stop_calls(), vec!["S1".to_string()]);
        assert_eq!(store.get().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_resumes_persisted_scan() {
        let backend = backend();
        let store = MemorySessionStore::with_record(PersistedSessionRecord {
            scan_id: "S1".to_string(),
            target: "https://app.example.com".to_string(),
            started_at: Utc::now(),
        });

        let mut wizard = open(&backend, &store);
        assert_eq!(wizard.step(), WizardStep::Scanning);
        assert!(wizard.state().detected_form().is_none());

        wizard.next_update().await.unwrap();
        assert_eq!(backend.status_calls(), vec!["S1".to_string()]);
        assert!(backend.login_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_events_are_dropped() {
        let backend = backend();
        let mut wizard = open(&backend, &MemorySessionStore::new());

        let update = wizard.observe(PollEvent::Snapshot {
            scan_id: "S9".to_string(),
            snapshot: StatusSnapshot::running("zap", 50),
        });
        assert!(update.is_none());
        assert!(wizard.report().is_none());
    }
}
