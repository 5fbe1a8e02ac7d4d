//! Login detection and login test endpoints.
//!
//! Detection inspects a login page and reports the forms it found. A login
//! test submits credentials once through the detected form; on success the
//! service hands back a temporary session id that is later exchanged for a
//! scan start.

use log::{debug, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::client::extract_error_message;
use crate::{ApiError, AuthScanClient};

/// A single input field found in a login form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// CSS selector that uniquely identifies the field on the page
    pub selector: String,
    /// `name` attribute, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// HTML input type (`text`, `email`, `password`, ...)
    #[serde(rename = "type", default = "default_input_type")]
    pub input_type: String,
    /// Visible label or placeholder text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Whether the page marks the field as required
    #[serde(default)]
    pub required: bool,
}

fn default_input_type() -> String {
    "text".to_string()
}

impl FieldDescriptor {
    /// Whether this is a password input.
    #[must_use]
    pub fn is_password(&self) -> bool {
        self.input_type.eq_ignore_ascii_case("password")
    }
}

/// The submit control of a login form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitButton {
    /// CSS selector of the button
    pub selector: String,
    /// Button caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A login form found on the login page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDescriptor {
    /// Input fields in document order
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Submit control, if one was found
    #[serde(default)]
    pub submit_button: Option<SubmitButton>,
}

impl FormDescriptor {
    /// Look up a field by selector.
    #[must_use]
    pub fn field(&self, selector: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.selector == selector)
    }

    /// Whether the form contains a password input.
    #[must_use]
    pub fn has_password_field(&self) -> bool {
        self.fields.iter().any(FieldDescriptor::is_password)
    }
}

/// Request body for login detection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectLoginRequest<'a> {
    pub login_url: &'a str,
}

/// Response from login detection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectLoginResponse {
    pub success: bool,
    #[serde(default)]
    pub forms: Vec<FormDescriptor>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DetectLoginResponse {
    /// Pick the form most likely to be the login form: the first one with a
    /// password input, otherwise the first form.
    #[must_use]
    pub fn best_form(&self) -> Option<&FormDescriptor> {
        self.forms
            .iter()
            .find(|form| form.has_password_field())
            .or_else(|| self.forms.first())
    }
}

/// One credential value typed into one field during a login test.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEntry {
    pub selector: String,
    #[serde(serialize_with = "serialize_secret")]
    pub value: SecretString,
    pub input_type: String,
}

impl std::fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("selector", &self.selector)
            .field("value", &"[REDACTED]")
            .field("input_type", &self.input_type)
            .finish()
    }
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Request body for a login test.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestLoginRequest {
    pub login_url: String,
    pub credentials: Vec<CredentialEntry>,
    pub submit_button: Option<String>,
}

/// Response from a login test.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestLoginResponse {
    pub authenticated: bool,
    #[serde(default)]
    pub temp_session_id: Option<String>,
    #[serde(default)]
    pub post_login_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl std::fmt::Debug for TestLoginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLoginResponse")
            .field("authenticated", &self.authenticated)
            .field(
                "temp_session_id",
                &self.temp_session_id.as_ref().map(|_| "[REDACTED]"),
            )
            .field("post_login_url", &self.post_login_url)
            .field("error_message", &self.error_message)
            .finish()
    }
}

/// Interpret a login test answer.
///
/// A rejected login is a normal answer, not a transport failure, and the
/// service may report it with 401/403. Those bodies are parsed like a 200.
pub fn parse_test_login_response(status: u16, body: &str) -> Result<TestLoginResponse, ApiError> {
    let success = (200..300).contains(&status);
    if success || status == 401 || status == 403 {
        if let Ok(parsed) = serde_json::from_str::<TestLoginResponse>(body) {
            return Ok(parsed);
        }
        if success {
            return Err(ApiError::InvalidResponse(format!(
                "Unparseable login test response: {body}"
            )));
        }
        return Ok(TestLoginResponse {
            authenticated: false,
            temp_session_id: None,
            post_login_url: None,
            error_message: extract_error_message(body).or_else(|| Some(format!("HTTP {status}"))),
        });
    }

    Err(ApiError::Rejected {
        status,
        message: extract_error_message(body).unwrap_or_else(|| body.to_string()),
    })
}

/// Login detection and login test operations.
pub struct AuthApi<'a> {
    client: &'a AuthScanClient,
}

impl<'a> AuthApi<'a> {
    pub fn new(client: &'a AuthScanClient) -> Self {
        Self { client }
    }

    /// Detect login forms on `login_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service rejects it.
    pub async fn detect_login_fields(&self, login_url: &str) -> Result<DetectLoginResponse, ApiError> {
        let endpoint = "/api/auth/detect";
        let response = self
            .client
            .post(endpoint, Some(&DetectLoginRequest { login_url }))
            .await?;
        let response = AuthScanClient::handle_response(response, endpoint).await?;
        let detection: DetectLoginResponse = AuthScanClient::read_json(response).await?;

        debug!(
            "🔎 Detection for {login_url}: success={} forms={}",
            detection.success,
            detection.forms.len()
        );
        for warning in &detection.warnings {
            warn!("⚠️  Detection warning: {warning}");
        }

        Ok(detection)
    }

    /// Submit credentials once through the login form.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or when the service rejects the
    /// request itself. A failed login is returned as `Ok` with
    /// `authenticated == false`.
    pub async fn test_login(&self, request: &TestLoginRequest) -> Result<TestLoginResponse, ApiError> {
        let endpoint = "/api/auth/test-login";
        debug!(
            "🔐 Testing login at {} with {} credential field(s)",
            request.login_url,
            request.credentials.len()
        );

        let response = self.client.post(endpoint, Some(request)).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_test_login_response(status, &body)
    }
}
