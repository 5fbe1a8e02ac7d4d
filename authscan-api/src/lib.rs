//! # Authenticated Scan API Client Library
//!
//! A Rust client library for the authenticated web scan service. The service
//! exposes a small set of REST endpoints that drive an authenticated security
//! assessment of a web target:
//!
//! - 🔎 **Login detection** - locate login forms and their fields on a login page
//! - 🔐 **Login test** - submit credentials once and receive a short-lived session id
//! - 🚀 **Scan start** - launch the scanner suite against the authenticated session
//! - 🔄 **Status polling** - read phase, progress and per-scanner results
//! - 🛑 **Scan stop** - best-effort cancellation of a running scan
//!
//! ## Quick Start
//!
//! ```no_run
//! use authscan_platform::{AuthScanClient, AuthScanConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthScanConfig::new("https://scanner.example.com");
//!     let client = AuthScanClient::new(config)?;
//!
//!     let detection = client
//!         .auth_api()
//!         .detect_login_fields("https://app.example.com/login")
//!         .await?;
//!     println!("found {} form(s)", detection.forms.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! Credential values and API tokens are held as [`secrecy::SecretString`] and are
//! redacted from `Debug` output.

pub mod auth;
pub mod client;
pub mod scan;

use secrecy::SecretString;
use std::time::Duration;

pub use auth::{
    AuthApi, CredentialEntry, DetectLoginRequest, DetectLoginResponse, FieldDescriptor,
    FormDescriptor, SubmitButton, TestLoginRequest, TestLoginResponse, parse_test_login_response,
};
pub use client::AuthScanClient;
pub use scan::{
    RemoteScanStatus, ScanApi, ScanStatusResponse, ScannerId, StartScanRequest,
    StartScanResponse, StopScanResponse, UnknownScannerId, parse_start_scan_response,
    parse_stop_scan_response,
};

/// Error code the service returns when the temporary login session is gone.
pub const SESSION_EXPIRED_CODE: &str = "SESSION_EXPIRED";

/// Custom error type for scan service API operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// HTTP request failed at the transport layer
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// JSON serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The service answered with something that could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// The temporary login session was consumed or expired server-side
    #[error("Temporary login session expired")]
    SessionExpired,
    /// The service rejected the request
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    /// When an item is not found
    #[error("Item not found: {0}")]
    NotFound(String),
}

impl ApiError {
    /// Whether the error came from the network layer rather than from the service.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Http(_))
    }
}

/// Configuration for the scan service client.
#[derive(Clone)]
pub struct AuthScanConfig {
    /// Base URL of the scan service, without a trailing slash
    pub base_url: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// Whether to validate TLS certificates (default: true)
    pub validate_certificates: bool,
    /// Optional bearer token for the service
    pub api_token: Option<SecretString>,
}

impl std::fmt::Debug for AuthScanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthScanConfig")
            .field("base_url", &self.base_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("validate_certificates", &self.validate_certificates)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl AuthScanConfig {
    /// Create a configuration pointing at `base_url` with default timeouts.
    ///
    /// A trailing slash on `base_url` is dropped so endpoint paths can be
    /// appended verbatim.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self {
            base_url,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            validate_certificates: true,
            api_token: None,
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the whole-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Attach a bearer token sent with every request.
    pub fn with_api_token(mut self, token: SecretString) -> Self {
        self.api_token = Some(token);
        self
    }

    /// Disable certificate validation for development environments.
    ///
    /// WARNING: This should only be used against local scanners with
    /// self-signed certificates.
    pub fn with_certificate_validation_disabled(mut self) -> Self {
        self.validate_certificates = false;
        self
    }

    /// Check that the base URL is an absolute http(s) URL.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidConfig` when the URL does not parse or uses
    /// another scheme.
    pub fn validate(&self) -> Result<(), ApiError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidConfig(format!("Invalid base URL: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ApiError::InvalidConfig(format!(
                "Unsupported base URL scheme: {other}"
            ))),
        }
    }
}
