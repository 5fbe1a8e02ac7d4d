//! Application configuration loaded from `AUTHSCAN_*` environment variables
use authscan_platform::AuthScanConfig;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::polling::PollingConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_STATE_FILE: &str = ".authscan/session.json";

/// Everything the binary needs to run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: AuthScanConfig,
    pub polling: PollingConfig,
    pub state_file: PathBuf,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("AUTHSCAN_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut api = AuthScanConfig::new(api_url);

        if let Some(token) = lookup("AUTHSCAN_API_TOKEN").filter(|t| !t.is_empty()) {
            api = api.with_api_token(SecretString::from(token));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "AUTHSCAN_REQUEST_TIMEOUT_SECS")? {
            api = api.with_request_timeout(Duration::from_secs(secs));
        }
        if lookup("AUTHSCAN_DISABLE_CERT_VALIDATION").is_some() {
            api = api.with_certificate_validation_disabled();
        }

        let mut polling = PollingConfig::default();
        if let Some(secs) = parse_var::<u64>(&lookup, "AUTHSCAN_POLL_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(AppError::InvalidConfig(
                    "AUTHSCAN_POLL_INTERVAL_SECS must be at least 1".to_string(),
                ));
            }
            polling = polling.with_interval(Duration::from_secs(secs));
        }
        if let Some(max_polls) = parse_var::<u32>(&lookup, "AUTHSCAN_MAX_POLLS")? {
            if max_polls == 0 {
                return Err(AppError::InvalidConfig(
                    "AUTHSCAN_MAX_POLLS must be at least 1".to_string(),
                ));
            }
            polling = polling.with_max_polls(max_polls);
        }

        let state_file = lookup("AUTHSCAN_STATE_FILE")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

        let config = Self {
            api,
            polling,
            state_file,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides.
    pub fn with_overrides(
        mut self,
        api_url: Option<String>,
        state_file: Option<PathBuf>,
    ) -> Result<Self, AppError> {
        if let Some(api_url) = api_url {
            let mut api = AuthScanConfig::new(api_url)
                .with_connect_timeout(self.api.connect_timeout)
                .with_request_timeout(self.api.request_timeout);
            api.validate_certificates = self.api.validate_certificates;
            api.api_token = self.api.api_token.take();
            self.api = api;
        }
        if let Some(state_file) = state_file {
            self.state_file = state_file;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), AppError> {
        self.api
            .validate()
            .map_err(|e| AppError::InvalidConfig(e.to_string()))
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, AppError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::InvalidConfig(format!("{name} must be a number, got '{raw}'"))),
    }
}
