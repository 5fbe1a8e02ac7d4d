//! CLI argument parsing for authscan
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::credentials::{CredentialArg, parse_credential_arg};

#[derive(Parser, Debug)]
#[command(
    name = "authscan",
    version,
    about = "Authenticated web security scan client",
    long_about = "Drives an authenticated scan against a scan service: detects the login form, tests the login, starts the scanner suite and collects partial results as they arrive",
    after_help = "ENVIRONMENT:
  AUTHSCAN_API_URL                   Scan service URL (default: http://localhost:3000)
  AUTHSCAN_API_TOKEN                 Bearer token for the scan service
  AUTHSCAN_STATE_FILE                Active-scan record (default: .authscan/session.json)
  AUTHSCAN_POLL_INTERVAL_SECS        Seconds between status requests (default: 3)
  AUTHSCAN_MAX_POLLS                 Give up after this many status requests (default: unlimited)
  AUTHSCAN_REQUEST_TIMEOUT_SECS      HTTP request timeout (default: 60)
  AUTHSCAN_DISABLE_CERT_VALIDATION   Accept invalid TLS certificates when set

EXAMPLES:
  # Scan with the password taken from the environment
  authscan scan --target https://app.example.com \\
      --login-url https://app.example.com/login \\
      --credential '#email=me@example.com' --credential '#password=env:APP_PASSWORD'

  # Pick up a scan interrupted by a restart
  authscan resume"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Scan service URL, overrides AUTHSCAN_API_URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Active-scan record location, overrides AUTHSCAN_STATE_FILE
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Detect login forms on a page
    Detect {
        /// Login page URL
        #[arg(long)]
        login_url: String,
    },

    /// Run an authenticated scan from configuration to results
    Scan {
        /// Site to scan
        #[arg(long)]
        target: String,

        /// Login page URL
        #[arg(long)]
        login_url: String,

        /// Field value as SELECTOR=VALUE; VALUE may be env:NAME. Only fields
        /// given here are filled in
        #[arg(long = "credential", required = true, value_parser = parse_credential_arg)]
        credentials: Vec<CredentialArg>,

        /// Submit button selector, overrides the detected one
        #[arg(long)]
        submit: Option<String>,

        /// Index of the detected form to use (default: the first form with a
        /// password field)
        #[arg(long)]
        form: Option<usize>,
    },

    /// Resume the scan recorded in the state file
    Resume,

    /// Stop the scan recorded in the state file
    Stop,

    /// Show the scan recorded in the state file
    Status,
}
