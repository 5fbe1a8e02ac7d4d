//! Authscan - authenticated web security scan client
//!
//! CLI for running, resuming and stopping authenticated scans
use authscan::commands::{self, ScanCommand};
use authscan::{AppConfig, Cli, Commands, FileSessionStore, Result, WizardController};
use authscan_platform::AuthScanClient;
use clap::Parser;
use log::{debug, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Initialize logging; RUST_LOG still wins when set
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    info!("Authscan - authenticated scan client");

    let config = AppConfig::from_env()?.with_overrides(args.api_url, args.state_file)?;
    debug!("Configuration: {config:?}");

    let client = Arc::new(AuthScanClient::new(config.api.clone())?);
    let store = Arc::new(FileSessionStore::new(&config.state_file));

    match args.command {
        Commands::Detect { login_url } => {
            commands::execute_detect(client.as_ref(), &login_url).await
        }
        Commands::Scan {
            target,
            login_url,
            credentials,
            submit,
            form,
        } => {
            let mut wizard = WizardController::open(client, store, config.polling)?;
            commands::execute_scan(
                &mut wizard,
                ScanCommand {
                    target,
                    login_url,
                    credentials,
                    submit,
                    form,
                },
            )
            .await
        }
        Commands::Resume => {
            let mut wizard = WizardController::open(client, store, config.polling)?;
            commands::execute_resume(&mut wizard).await
        }
        Commands::Stop => commands::execute_stop(client.as_ref(), store.as_ref()).await,
        Commands::Status => commands::execute_status(store.as_ref(), &config.state_file),
    }
}
