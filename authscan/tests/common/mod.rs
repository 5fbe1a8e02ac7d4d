//! Shared helpers for authscan integration tests
#![allow(dead_code)]

use authscan::ScanBackend;
use authscan_platform::{
    ApiError, DetectLoginResponse, ScanStatusResponse, StartScanRequest, StartScanResponse,
    StopScanResponse, TestLoginRequest, TestLoginResponse,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct Script {
    logins: VecDeque<TestLoginResponse>,
    starts: VecDeque<Result<StartScanResponse, ApiError>>,
    statuses: VecDeque<ScanStatusResponse>,
    status_calls: Vec<String>,
    start_calls: Vec<StartScanRequest>,
    stop_calls: Vec<String>,
}

/// Scan service stand-in driven by canned JSON answers.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn login(&self, body: serde_json::Value) {
        let response = serde_json::from_value(body).expect("login body");
        self.script.lock().unwrap().logins.push_back(response);
    }

    pub fn start(&self, status: u16, body: serde_json::Value) {
        let response = authscan_platform::parse_start_scan_response(status, &body.to_string());
        self.script.lock().unwrap().starts.push_back(response);
    }

    pub fn status(&self, body: serde_json::Value) {
        let response = serde_json::from_value(body).expect("status body");
        self.script.lock().unwrap().statuses.push_back(response);
    }

    /// Hold every status request until the returned handle is notified.
    pub fn hold_status(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.script.lock().unwrap().status_calls.clone()
    }

    pub fn start_calls(&self) -> usize {
        self.script.lock().unwrap().start_calls.len()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.script.lock().unwrap().stop_calls.clone()
    }
}

impl ScanBackend for ScriptedBackend {
    async fn detect_login_fields(&self, _login_url: &str) -> Result<DetectLoginResponse, ApiError> {
        Ok(serde_json::from_value(json!({
            "success": true,
            "forms": [{
                "fields": [
                    {"selector": "#user", "type": "text", "required": true},
                    {"selector": "#pass", "type": "password", "required": true}
                ],
                "submitButton": {"selector": "#login", "text": "Log in"}
            }],
            "warnings": []
        }))?)
    }

    async fn test_login(&self, _request: TestLoginRequest) -> Result<TestLoginResponse, ApiError> {
        self.script
            .lock()
            .unwrap()
            .logins
            .pop_front()
            .ok_or_else(|| ApiError::InvalidResponse("unexpected login test".to_string()))
    }

    async fn start_scan(&self, request: StartScanRequest) -> Result<StartScanResponse, ApiError> {
        let mut script = self.script.lock().unwrap();
        script.start_calls.push(request);
        script
            .starts
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidResponse("unexpected scan start".to_string())))
    }

    async fn scan_status(&self, scan_id: &str) -> Result<ScanStatusResponse, ApiError> {
        self.script
            .lock()
            .unwrap()
            .status_calls
            .push(scan_id.to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let next = self.script.lock().unwrap().statuses.pop_front();
        Ok(next.unwrap_or_else(|| {
            serde_json::from_value(json!({"status": "running", "progress": 5}))
                .expect("default status")
        }))
    }

    async fn stop_scan(&self, scan_id: &str) -> Result<StopScanResponse, ApiError> {
        self.script
            .lock()
            .unwrap()
            .stop_calls
            .push(scan_id.to_string());
        Ok(StopScanResponse {
            stopped: true,
            message: None,
        })
    }
}
