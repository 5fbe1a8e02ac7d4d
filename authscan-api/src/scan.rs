//! Authenticated scan endpoints: start, status and stop.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::client::extract_error_message;
use crate::{ApiError, AuthScanClient, SESSION_EXPIRED_CODE};

/// The remote analysis engines that contribute to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScannerId {
    /// Active vulnerability scan
    Zap,
    /// Configuration and security header analysis
    Observatory,
    /// Performance analysis
    Psi,
    /// Page intelligence analysis
    PageIntel,
    /// Natural-language summary
    Summary,
}

impl ScannerId {
    /// Every known scanner, in report order.
    pub const ALL: [ScannerId; 5] = [
        ScannerId::Zap,
        ScannerId::Observatory,
        ScannerId::Psi,
        ScannerId::PageIntel,
        ScannerId::Summary,
    ];

    /// Wire name of the scanner.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerId::Zap => "zap",
            ScannerId::Observatory => "observatory",
            ScannerId::Psi => "psi",
            ScannerId::PageIntel => "pageIntel",
            ScannerId::Summary => "summary",
        }
    }
}

impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scanner id the client does not know about.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown scanner id: {0}")]
pub struct UnknownScannerId(pub String);

impl FromStr for ScannerId {
    type Err = UnknownScannerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScannerId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownScannerId(s.to_string()))
    }
}

/// Request body for starting an authenticated scan.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanRequest {
    pub target_url: String,
    pub login_url: String,
    pub temp_session_id: String,
}

impl fmt::Debug for StartScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartScanRequest")
            .field("target_url", &self.target_url)
            .field("login_url", &self.login_url)
            .field("temp_session_id", &"[REDACTED]")
            .finish()
    }
}

/// Successful scan start.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanResponse {
    pub scan_id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Interpret a scan start answer.
///
/// A body carrying `code: SESSION_EXPIRED` means the temporary login session
/// is gone regardless of the HTTP status.
pub fn parse_start_scan_response(status: u16, body: &str) -> Result<StartScanResponse, ApiError> {
    if let Ok(error_body) = serde_json::from_str::<ErrorBody>(body) {
        if error_body.code.as_deref() == Some(SESSION_EXPIRED_CODE) {
            return Err(ApiError::SessionExpired);
        }
        if !(200..300).contains(&status) {
            return Err(ApiError::Rejected {
                status,
                message: error_body
                    .message
                    .or(error_body.error)
                    .or(error_body.code)
                    .unwrap_or_else(|| format!("HTTP {status}")),
            });
        }
    }

    if !(200..300).contains(&status) {
        return Err(ApiError::Rejected {
            status,
            message: body.to_string(),
        });
    }

    let parsed: StartScanResponse = serde_json::from_str(body).map_err(|e| {
        ApiError::InvalidResponse(format!("Missing scanId in scan start response: {e}"))
    })?;
    if parsed.scan_id.trim().is_empty() {
        return Err(ApiError::InvalidResponse(
            "Empty scanId in scan start response".to_string(),
        ));
    }
    Ok(parsed)
}

/// Remote scan status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RemoteScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteScanStatus::Queued => write!(f, "queued"),
            RemoteScanStatus::Running => write!(f, "running"),
            RemoteScanStatus::Completed => write!(f, "completed"),
            RemoteScanStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One status poll answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusResponse {
    pub status: RemoteScanStatus,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub progress: i64,
    #[serde(default)]
    pub message: String,
    /// Scanners that have finished, by wire name
    #[serde(default)]
    pub arrived: Vec<String>,
    /// Scanner payloads by wire name; `null` means not available yet
    #[serde(default)]
    pub results: BTreeMap<String, Option<serde_json::Value>>,
    /// Failure reason when `status == failed`
    #[serde(default)]
    pub error: Option<String>,
}

/// Acknowledgement of a stop request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopScanResponse {
    /// `false` when the service declined to stop the scan
    #[serde(default = "stopped_by_default")]
    pub stopped: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn stopped_by_default() -> bool {
    true
}

/// Interpret the body of a successful stop request.
///
/// A success status with an empty or unstructured body counts as stopped.
#[must_use]
pub fn parse_stop_scan_response(body: &str) -> StopScanResponse {
    if body.trim().is_empty() {
        return StopScanResponse {
            stopped: true,
            message: None,
        };
    }
    serde_json::from_str(body).unwrap_or_else(|_| StopScanResponse {
        stopped: true,
        message: extract_error_message(body),
    })
}

/// Scan start, status and stop operations.
pub struct ScanApi<'a> {
    client: &'a AuthScanClient,
}

impl<'a> ScanApi<'a> {
    pub fn new(client: &'a AuthScanClient) -> Self {
        Self { client }
    }

    fn scan_endpoint(scan_id: &str, action: &str) -> String {
        format!(
            "/api/scan/authenticated/{}/{action}",
            urlencoding::encode(scan_id)
        )
    }

    /// Start the scanner suite against an authenticated session.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::SessionExpired` when the temporary session is gone,
    /// `ApiError::Rejected` when the service refuses the scan, or a transport
    /// error.
    pub async fn start_scan(&self, request: &StartScanRequest) -> Result<StartScanResponse, ApiError> {
        let response = self
            .client
            .post("/api/scan/authenticated", Some(request))
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let started = parse_start_scan_response(status, &body)?;
        info!(
            "🚀 Scan {} accepted for {}",
            started.scan_id, request.target_url
        );
        Ok(started)
    }

    /// Read the current status of a scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the scan is unknown, or the
    /// body does not parse.
    pub async fn scan_status(&self, scan_id: &str) -> Result<ScanStatusResponse, ApiError> {
        let endpoint = Self::scan_endpoint(scan_id, "status");
        let response = self.client.get(&endpoint).await?;
        let response = AuthScanClient::handle_response(response, &endpoint).await?;
        let status: ScanStatusResponse = AuthScanClient::read_json(response).await?;

        debug!(
            "🔄 Scan {scan_id}: {} phase={} progress={}",
            status.status, status.phase, status.progress
        );
        Ok(status)
    }

    /// Ask the service to stop a scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service refuses it.
    pub async fn stop_scan(&self, scan_id: &str) -> Result<StopScanResponse, ApiError> {
        let endpoint = Self::scan_endpoint(scan_id, "stop");
        let response = self.client.post::<()>(&endpoint, None).await?;
        let response = AuthScanClient::handle_response(response, &endpoint).await?;

        let body = response.text().await?;
        Ok(parse_stop_scan_response(&body))
    }
}
