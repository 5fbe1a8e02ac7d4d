//! Command implementations for the authscan binary
use authscan_platform::{FormDescriptor, ScannerId};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::path::Path;

use crate::aggregator::Report;
use crate::backend::ScanBackend;
use crate::cancellation::{CancelOutcome, CancellationManager};
use crate::credentials::CredentialArg;
use crate::error::{Result, WizardError};
use crate::scan_session::ScanSession;
use crate::session_store::SessionStore;
use crate::wizard::{LoginOutcome, ScanUpdate, WizardController, WizardStep};

/// Arguments of the `scan` command.
#[derive(Debug, Clone)]
pub struct ScanCommand {
    pub target: String,
    pub login_url: String,
    pub credentials: Vec<CredentialArg>,
    pub submit: Option<String>,
    pub form: Option<usize>,
}

/// Print the forms detected on `login_url`.
pub async fn execute_detect<B: ScanBackend>(backend: &B, login_url: &str) -> Result<()> {
    info!("🔍 Detecting login forms on {login_url}");
    let response = backend.detect_login_fields(login_url).await?;

    for warning in &response.warnings {
        warn!("⚠️  {warning}");
    }
    if response.forms.is_empty() {
        let reason = response
            .error
            .unwrap_or_else(|| "no login form found on the page".to_string());
        return Err(WizardError::Detection(reason).into());
    }

    for (index, form) in response.forms.iter().enumerate() {
        println!("Form {index}:");
        for line in describe_form(form) {
            println!("  {line}");
        }
    }
    Ok(())
}

/// Run the wizard from configuration to results.
pub async fn execute_scan<B, S>(wizard: &mut WizardController<B, S>, command: ScanCommand) -> Result<()>
where
    B: ScanBackend,
    S: SessionStore,
{
    if let Some(session) = wizard.session() {
        return Err(WizardError::InvalidInput(format!(
            "scan {} is still active; run `authscan resume` or `authscan stop` first",
            session.scan_id()
        ))
        .into());
    }

    wizard.configure(&command.target, &command.login_url)?;

    let detected = wizard.detect_login_form().await?;
    let form = match command.form {
        Some(index) => detected.forms.get(index).cloned().ok_or_else(|| {
            WizardError::InvalidInput(format!(
                "form {index} does not exist, {} form(s) detected",
                detected.forms.len()
            ))
        })?,
        None => detected
            .best_form()
            .cloned()
            .ok_or_else(|| WizardError::Detection("no login form found".to_string()))?,
    };
    select_fields(wizard, form, &command.credentials)?;

    if let Some(submit) = &command.submit {
        wizard.set_submit_selector(submit)?;
    }

    match wizard.test_login().await? {
        LoginOutcome::Authenticated { post_login_url } => {
            if let Some(url) = post_login_url {
                info!("🔓 Logged in, landed on {url}");
            }
        }
        LoginOutcome::Failed { message } => {
            error!("❌ Login test failed: {message}");
            return Err(WizardError::Authentication(message).into());
        }
    }

    let scan_id = wizard.start_scan().await?;
    println!("Scan {scan_id} started");
    wait_for_results(wizard).await
}

/// Fill only the fields that have a credential argument.
fn select_fields<B, S>(
    wizard: &mut WizardController<B, S>,
    form: FormDescriptor,
    credentials: &[CredentialArg],
) -> Result<()>
where
    B: ScanBackend,
    S: SessionStore,
{
    let wanted: BTreeSet<&str> = credentials.iter().map(|c| c.selector.as_str()).collect();
    if let Some(unknown) = wanted.iter().find(|s| form.field(s).is_none()) {
        return Err(WizardError::InvalidInput(format!(
            "field '{unknown}' is not part of the detected form"
        ))
        .into());
    }

    let unwanted: Vec<String> = form
        .fields
        .iter()
        .filter(|f| !wanted.contains(f.selector.as_str()))
        .map(|f| f.selector.clone())
        .collect();
    wizard.submit_detection_result(form)?;
    for selector in unwanted {
        wizard.toggle_field(&selector)?;
    }

    for credential in credentials {
        let value = credential.resolve_from_env()?;
        wizard.set_credential(&credential.selector, value)?;
    }
    Ok(())
}

/// Continue the scan recorded in the state file.
pub async fn execute_resume<B, S>(wizard: &mut WizardController<B, S>) -> Result<()>
where
    B: ScanBackend,
    S: SessionStore,
{
    if wizard.step() != WizardStep::Scanning {
        println!("No active scan to resume");
        return Ok(());
    }
    wait_for_results(wizard).await
}

enum Wake {
    Update(Option<ScanUpdate>),
    Interrupted,
}

/// Print progress until the scan ends. Ctrl+C stops the scan.
async fn wait_for_results<B, S>(wizard: &mut WizardController<B, S>) -> Result<()>
where
    B: ScanBackend,
    S: SessionStore,
{
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let wake = tokio::select! {
            update = wizard.next_update() => Wake::Update(update),
            _ = &mut ctrl_c => Wake::Interrupted,
        };

        match wake {
            Wake::Update(Some(ScanUpdate::Progress {
                phase,
                progress,
                message,
                newly_arrived,
            })) => {
                let arrived: Vec<&str> = newly_arrived.iter().map(ScannerId::as_str).collect();
                if arrived.is_empty() {
                    println!("[{progress:>3}%] {phase} {message}");
                } else {
                    println!("[{progress:>3}%] {phase} {message} (new: {})", arrived.join(", "));
                }
            }
            Wake::Update(Some(ScanUpdate::Completed)) | Wake::Update(None) => break,
            Wake::Update(Some(ScanUpdate::Failed { reason })) => {
                print_report(wizard.report())?;
                return Err(WizardError::ScanFailed(reason).into());
            }
            Wake::Interrupted => {
                warn!("Interrupted, stopping scan");
                if let CancelOutcome::Stopped { acknowledged } = wizard.stop().await {
                    println!(
                        "Scan stopped{}",
                        if acknowledged { "" } else { " locally (service did not confirm)" }
                    );
                }
                break;
            }
        }
    }

    print_report(wizard.report())
}

fn print_report(report: Option<&Report>) -> Result<()> {
    let Some(report) = report else {
        return Ok(());
    };
    for line in scanner_summary(report) {
        println!("{line}");
    }
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// One line per scanner.
pub fn scanner_summary(report: &Report) -> Vec<String> {
    report
        .scanners()
        .iter()
        .map(|(id, slot)| {
            let status = match (slot.arrived, slot.payload.is_some()) {
                (true, true) => "✅ results available",
                (true, false) => "✅ finished, no results",
                (false, _) if report.is_partial => "⏳ pending",
                (false, _) => "➖ not run",
            };
            format!("{:<12} {status}", id.as_str())
        })
        .collect()
}

/// Stop the scan recorded in the state file.
pub async fn execute_stop<B, S>(backend: &B, store: &S) -> Result<()>
where
    B: ScanBackend,
    S: SessionStore + ?Sized,
{
    let Some(record) = store.get()? else {
        println!("No active scan");
        return Ok(());
    };

    let mut session = ScanSession::resume(record);
    match CancellationManager::new(backend, store).stop(&mut session).await {
        CancelOutcome::Stopped { acknowledged: true } => {
            println!("Scan {} stopped", session.scan_id())
        }
        CancelOutcome::Stopped { acknowledged: false } => println!(
            "Scan {} stopped locally; the service did not confirm",
            session.scan_id()
        ),
        CancelOutcome::NotActive => println!("No active scan"),
    }
    Ok(())
}

/// Print the scan recorded in the state file.
pub fn execute_status<S: SessionStore + ?Sized>(store: &S, state_file: &Path) -> Result<()> {
    match store.get()? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No active scan recorded in {}", state_file.display()),
    }
    Ok(())
}

fn describe_form(form: &FormDescriptor) -> Vec<String> {
    let mut lines: Vec<String> = form
        .fields
        .iter()
        .map(|field| {
            let label = field
                .label
                .as_deref()
                .or(field.name.as_deref())
                .unwrap_or("-");
            let required = if field.required { " (required)" } else { "" };
            format!("{} [{}] {label}{required}", field.selector, field.input_type)
        })
        .collect();
    if let Some(button) = &form.submit_button {
        lines.push(format!(
            "submit: {} {}",
            button.selector,
            button.text.as_deref().unwrap_or("")
        ));
    }
    lines
}
