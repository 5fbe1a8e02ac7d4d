//! Core scan service client implementation.
//!
//! This module contains the foundational HTTP client used by the endpoint
//! modules. It owns URL construction, bearer authentication and the common
//! response checks.

use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auth::AuthApi;
use crate::scan::ScanApi;
use crate::{ApiError, AuthScanConfig};

/// Core scan service client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct AuthScanClient {
    config: AuthScanConfig,
    client: Client,
}

impl std::fmt::Debug for AuthScanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthScanClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthScanClient {
    /// Create a new scan service client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: AuthScanConfig) -> Result<Self, ApiError> {
        config.validate()?;

        let mut client_builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);

        if !config.validate_certificates {
            client_builder = client_builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let client = client_builder.build()?;
        Ok(Self { config, client })
    }

    /// Get the base URL for API requests.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Get access to the configuration
    #[must_use]
    pub fn config(&self) -> &AuthScanConfig {
        &self.config
    }

    /// Login detection and login test endpoints.
    #[must_use]
    pub fn auth_api(&self) -> AuthApi<'_> {
        AuthApi::new(self)
    }

    /// Scan start, status and stop endpoints.
    #[must_use]
    pub fn scan_api(&self) -> ScanApi<'_> {
        ScanApi::new(self)
    }

    fn url(&self, endpoint: &str) -> String {
        let mut url =
            String::with_capacity(self.config.base_url.len().saturating_add(endpoint.len()));
        url.push_str(&self.config.base_url);
        url.push_str(endpoint);
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Make a GET request to the specified endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn get(&self, endpoint: &str) -> Result<Response, ApiError> {
        let url = self.url(endpoint);
        debug!("GET {url}");

        let request = self
            .client
            .get(&url)
            .header("accept", "application/json");
        Ok(self.authorize(request).send().await?)
    }

    /// Make a POST request to the specified endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized or the request
    /// cannot be sent.
    pub async fn post<T: Serialize>(
        &self,
        endpoint: &str,
        body: Option<&T>,
    ) -> Result<Response, ApiError> {
        let url = self.url(endpoint);
        debug!("POST {url}");

        let mut request = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .header("content-type", "application/json");

        if let Some(body) = body {
            request = request.body(serde_json::to_string(body)?);
        }

        Ok(self.authorize(request).send().await?)
    }

    /// Helper method to handle common response processing.
    ///
    /// Checks if the response is successful and turns failures into
    /// `ApiError::NotFound` (404) or `ApiError::Rejected`.
    ///
    /// # Errors
    ///
    /// Returns an error for any non-2xx status.
    pub async fn handle_response(response: Response, context: &str) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 404 {
            return Err(ApiError::NotFound(format!("{context}: {error_text}")));
        }
        Err(ApiError::Rejected {
            status: status.as_u16(),
            message: extract_error_message(&error_text).unwrap_or(error_text),
        })
    }

    /// Read a JSON body into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read or does not parse.
    pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Pull a human readable message out of a JSON error body, if there is one.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    ["message", "error", "errorMessage"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_owned)
}
