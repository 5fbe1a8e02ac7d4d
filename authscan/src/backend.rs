//! The remote collaborators the orchestration core talks to.
//!
//! [`ScanBackend`] is implemented by [`AuthScanClient`] for production use and
//! by in-memory fakes in tests.

use authscan_platform::{
    ApiError, AuthScanClient, DetectLoginResponse, ScanStatusResponse, StartScanRequest,
    StartScanResponse, StopScanResponse, TestLoginRequest, TestLoginResponse,
};
use std::future::Future;

/// Calls into the scan service.
pub trait ScanBackend: Send + Sync + 'static {
    /// Detect login forms on the login page.
    fn detect_login_fields(
        &self,
        login_url: &str,
    ) -> impl Future<Output = Result<DetectLoginResponse, ApiError>> + Send;

    /// Submit credentials once and obtain a temporary session id.
    fn test_login(
        &self,
        request: TestLoginRequest,
    ) -> impl Future<Output = Result<TestLoginResponse, ApiError>> + Send;

    /// Start the scanner suite.
    fn start_scan(
        &self,
        request: StartScanRequest,
    ) -> impl Future<Output = Result<StartScanResponse, ApiError>> + Send;

    /// Read the current scan status.
    fn scan_status(
        &self,
        scan_id: &str,
    ) -> impl Future<Output = Result<ScanStatusResponse, ApiError>> + Send;

    /// Ask the service to stop the scan.
    fn stop_scan(
        &self,
        scan_id: &str,
    ) -> impl Future<Output = Result<StopScanResponse, ApiError>> + Send;
}

impl ScanBackend for AuthScanClient {
    async fn detect_login_fields(&self, login_url: &str) -> Result<DetectLoginResponse, ApiError> {
        self.auth_api().detect_login_fields(login_url).await
    }

    async fn test_login(&self, request: TestLoginRequest) -> Result<TestLoginResponse, ApiError> {
        self.auth_api().test_login(&request).await
    }

    async fn start_scan(&self, request: StartScanRequest) -> Result<StartScanResponse, ApiError> {
        self.scan_api().start_scan(&request).await
    }

    async fn scan_status(&self, scan_id: &str) -> Result<ScanStatusResponse, ApiError> {
        self.scan_api().scan_status(scan_id).await
    }

    async fn stop_scan(&self, scan_id: &str) -> Result<StopScanResponse, ApiError> {
        self.scan_api().stop_scan(scan_id).await
    }
}
