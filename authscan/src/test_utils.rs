//! Scripted in-memory scan service for unit tests

use authscan_platform::{
    ApiError, DetectLoginResponse, FieldDescriptor, FormDescriptor, RemoteScanStatus,
    ScanStatusResponse, StartScanRequest, StartScanResponse, StopScanResponse, SubmitButton,
    TestLoginRequest, TestLoginResponse,
};
use secrecy::ExposeSecret;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::backend::ScanBackend;
use crate::session_store::{PersistedSessionRecord, SessionStore, StoreError};

/// A recorded login test: `(selector, value)` pairs plus the submit selector.
pub type RecordedLogin = (Vec<(String, String)>, Option<String>);

/// Scan service fake. Responses are consumed in order; when the status
/// script runs dry a plain `running` status is returned.
#[derive(Default)]
pub struct FakeBackend {
    detection: Mutex<Option<DetectLoginResponse>>,
    logins: Mutex<VecDeque<TestLoginResponse>>,
    starts: Mutex<VecDeque<Result<StartScanResponse, ApiError>>>,
    statuses: Mutex<VecDeque<Result<ScanStatusResponse, ApiError>>>,
    status_gate: Mutex<Option<Arc<Notify>>>,
    stop_fails: AtomicBool,
    stop_declined: AtomicBool,

    login_calls: Mutex<Vec<RecordedLogin>>,
    start_calls: Mutex<Vec<StartScanRequest>>,
    status_calls: Mutex<Vec<String>>,
    stop_calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detection(self, detection: DetectLoginResponse) -> Self {
        *self.detection.lock().unwrap() = Some(detection);
        self
    }

    pub fn push_login(&self, response: TestLoginResponse) {
        self.logins.lock().unwrap().push_back(response);
    }

    pub fn push_start(&self, response: Result<StartScanResponse, ApiError>) {
        self.starts.lock().unwrap().push_back(response);
    }

    pub fn push_status(&self, response: Result<ScanStatusResponse, ApiError>) {
        self.statuses.lock().unwrap().push_back(response);
    }

    /// Make every status call wait for a `notify_one` on the returned handle.
    pub fn gate_status(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.status_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_stop(&self) {
        self.stop_fails.store(true, Ordering::SeqCst);
    }

    /// Answer stop requests with `stopped: false`.
    pub fn decline_stop(&self) {
        self.stop_declined.store(true, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> Vec<RecordedLogin> {
        self.login_calls.lock().unwrap().clone()
    }

    pub fn start_calls(&self) -> Vec<StartScanRequest> {
        self.start_calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.stop_calls.lock().unwrap().clone()
    }
}

/// Session store whose writes always fail. Reads see an empty slot.
pub struct UnwritableStore;

impl SessionStore for UnwritableStore {
    fn get(&self) -> Result<Option<PersistedSessionRecord>, StoreError> {
        Ok(None)
    }

    fn set(&self, _record: &PersistedSessionRecord) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: "session.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl ScanBackend for FakeBackend {
    async fn detect_login_fields(&self, _login_url: &str) -> Result<DetectLoginResponse, ApiError> {
        self.detection
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::Rejected {
                status: 502,
                message: "page did not load".to_string(),
            })
    }

    async fn test_login(&self, request: TestLoginRequest) -> Result<TestLoginResponse, ApiError> {
        let values = request
            .credentials
            .iter()
            .map(|c| (c.selector.clone(), c.value.expose_secret().to_string()))
            .collect();
        self.login_calls
            .lock()
            .unwrap()
            .push((values, request.submit_button.clone()));

        self.logins
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::InvalidResponse("no scripted login".to_string()))
    }

    async fn start_scan(&self, request: StartScanRequest) -> Result<StartScanResponse, ApiError> {
        self.start_calls.lock().unwrap().push(request);
        self.starts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidResponse("no scripted start".to_string())))
    }

    async fn scan_status(&self, scan_id: &str) -> Result<ScanStatusResponse, ApiError> {
        self.status_calls.lock().unwrap().push(scan_id.to_string());

        let gate = self.status_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(running(10, &[])))
    }

    async fn stop_scan(&self, scan_id: &str) -> Result<StopScanResponse, ApiError> {
        self.stop_calls.lock().unwrap().push(scan_id.to_string());
        if self.stop_fails.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        if self.stop_declined.load(Ordering::SeqCst) {
            return Ok(StopScanResponse {
                stopped: false,
                message: Some("scan is already finishing".to_string()),
            });
        }
        Ok(StopScanResponse {
            stopped: true,
            message: None,
        })
    }
}

fn status(
    status: RemoteScanStatus,
    progress: i64,
    arrived: &[&str],
    error: Option<&str>,
) -> ScanStatusResponse {
    let results: BTreeMap<String, Option<serde_json::Value>> = arrived
        .iter()
        .map(|name| (name.to_string(), Some(json!({ "scanner": name }))))
        .collect();

    ScanStatusResponse {
        status,
        phase: arrived.last().map(|s| s.to_string()).unwrap_or_default(),
        progress,
        message: format!("{progress}%"),
        arrived: arrived.iter().map(|s| s.to_string()).collect(),
        results,
        error: error.map(str::to_owned),
    }
}

/// A `running` status whose `arrived` scanners all carry a payload.
pub fn running(progress: i64, arrived: &[&str]) -> ScanStatusResponse {
    status(RemoteScanStatus::Running, progress, arrived, None)
}

/// A `completed` status whose `arrived` scanners all carry a payload.
pub fn completed(arrived: &[&str]) -> ScanStatusResponse {
    status(RemoteScanStatus::Completed, 100, arrived, None)
}

/// A `failed` status.
pub fn failed(reason: &str) -> ScanStatusResponse {
    status(RemoteScanStatus::Failed, 50, &[], Some(reason))
}

/// A detection result with one email/password form.
pub fn login_form_detection() -> DetectLoginResponse {
    DetectLoginResponse {
        success: true,
        forms: vec![FormDescriptor {
            fields: vec![
                FieldDescriptor {
                    selector: "#email".to_string(),
                    name: Some("email".to_string()),
                    input_type: "email".to_string(),
                    label: Some("Email".to_string()),
                    required: true,
                },
                FieldDescriptor {
                    selector: "#password".to_string(),
                    name: Some("password".to_string()),
                    input_type: "password".to_string(),
                    label: Some("Password".to_string()),
                    required: true,
                },
                FieldDescriptor {
                    selector: "#remember".to_string(),
                    name: Some("remember".to_string()),
                    input_type: "checkbox".to_string(),
                    label: None,
                    required: false,
                },
            ],
            submit_button: Some(SubmitButton {
                selector: "button[type=submit]".to_string(),
                text: Some("Sign in".to_string()),
            }),
        }],
        warnings: vec![],
        error: None,
    }
}

pub fn login_ok(temp_session_id: &str) -> TestLoginResponse {
    TestLoginResponse {
        authenticated: true,
        temp_session_id: Some(temp_session_id.to_string()),
        post_login_url: Some("https://app.example.com/dashboard".to_string()),
        error_message: None,
    }
}

pub fn login_rejected(message: &str) -> TestLoginResponse {
    TestLoginResponse {
        authenticated: false,
        temp_session_id: None,
        post_login_url: None,
        error_message: Some(message.to_string()),
    }
}
