//! Command handlers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use packdrop_client::{Client, HttpPartUploader};
use packdrop_upload::{
    Credentials, FileOutcome, PackageOrchestrator, PackageOutcome, PackageReport, PackageRequest,
    UploadEvent,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::{ApiKeyArgs, AuthArgs, UploadArgs};
use crate::config::{Config, config_path};

/// Uploads the files into a new package, cancelling cleanly on Ctrl-C.
pub async fn upload(mut config: Config, args: UploadArgs) -> anyhow::Result<()> {
    args.apply(&mut config);
    let session = config.session_config()?;

    let client = Client::with_credentials(&session.credentials)?.with_base_url(&config.api_url);
    let uploader = HttpPartUploader::new()?;

    let mut orchestrator = PackageOrchestrator::new();
    let events = orchestrator
        .take_events()
        .context("event channel already taken")?;
    let printer = tokio::spawn(print_events(events));
    let cancel = orchestrator.cancel_token();

    let request = PackageRequest {
        name: args.name,
        description: args.description,
        recipients: args.recipients,
        files: args.files,
    };

    let report = {
        let upload = orchestrator.upload(session, Arc::new(client), Arc::new(uploader), &request);
        tokio::pin!(upload);

        tokio::select! {
            report = &mut upload => report,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received, cancelling upload");
                cancel.cancel();
                upload.await
            }
        }
    };

    // Closes the event channel so the printer drains and exits.
    drop(orchestrator);
    if let Err(e) = printer.await {
        warn!(error = %e, "progress printer failed");
    }

    for line in report_lines(&report) {
        println!("{line}");
    }

    match report.outcome() {
        PackageOutcome::Complete => Ok(()),
        PackageOutcome::PartialSuccess => bail!(
            "{} of {} file(s) finalized; package left open",
            report.finalized_count(),
            report.files.len()
        ),
        PackageOutcome::Failed => match report.error {
            Some(e) => Err(e).context("package upload failed"),
            None => bail!("package upload failed"),
        },
    }
}

/// Exchanges credentials for a user token, printing or saving it.
pub async fn auth(
    config: &Config,
    config_file: Option<&Path>,
    args: AuthArgs,
) -> anyhow::Result<()> {
    let client = Client::new()?.with_base_url(&config.api_url);
    let response = client.authenticate(&args.email, &args.password).await?;
    info!(email = %args.email, "authenticated");

    if !args.save {
        println!("{}", response.token);
        return Ok(());
    }

    // Re-read the file so environment overrides are not persisted.
    let location = match config_file {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };
    let mut stored = if location.exists() {
        Config::load(Some(&location))?
    } else {
        Config::default()
    };
    stored.user_token = response.token;
    stored.save(&location)?;
    println!("user token saved to {}", location.display());
    Ok(())
}

/// Creates a team API key and prints its id and secret.
pub async fn api_key(config: &Config, args: ApiKeyArgs) -> anyhow::Result<()> {
    if config.user_token.is_empty() {
        bail!("no user token configured; run `packdrop auth --save` first");
    }
    if config.team_id.is_empty() {
        bail!("no team id configured");
    }

    let client = Client::with_credentials(&Credentials {
        user_token: config.user_token.clone(),
        team_id: config.team_id.clone(),
    })?
    .with_base_url(&config.api_url);

    let key = client.create_api_key(&args.name, &args.expiry).await?;
    info!(id = %key.id, name = %args.name, "api key created");
    println!("id:     {}", key.id);
    println!("key:    {}", key.key);
    println!("expiry: {}", key.expiry);
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<UploadEvent>) {
    // File sizes announced by `FileStarted`.
    let mut progress: HashMap<PathBuf, u64> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::PackageOpened { package_id } => {
                eprintln!("package {package_id} created");
            }
            UploadEvent::FileStarted {
                path,
                size_bytes,
                part_count,
            } => {
                eprintln!(
                    "{}: {size_bytes} bytes in {part_count} part(s)",
                    path.display()
                );
                progress.insert(path, size_bytes);
            }
            UploadEvent::PartUploaded {
                path,
                part_number,
                uploaded_bytes,
                bytes_per_second,
                eta,
                ..
            } => {
                let total = progress.get(&path).copied().unwrap_or(0);
                let percent = if total == 0 {
                    100.0
                } else {
                    uploaded_bytes as f64 * 100.0 / total as f64
                };
                let eta = eta.map_or_else(|| "--".to_string(), |d| format!("{}s", d.as_secs()));
                eprintln!(
                    "{}: part {part_number} done ({percent:.1}%, {:.1} MiB/s, eta {eta})",
                    path.display(),
                    bytes_per_second / (1024.0 * 1024.0)
                );
            }
            UploadEvent::PartRetry {
                path,
                part_number,
                attempt,
                delay,
                error,
            } => {
                eprintln!(
                    "{}: part {part_number} attempt {attempt} failed ({error}), retrying in {delay:?}",
                    path.display()
                );
            }
            UploadEvent::FileFinalized { path, file_id } => {
                eprintln!("{}: finalized as {file_id}", path.display());
            }
            UploadEvent::FileFailed { path, error } => {
                eprintln!("{}: failed: {error}", path.display());
            }
            UploadEvent::PackageFinalized { package_id } => {
                eprintln!("package {package_id} finalized");
            }
        }
    }
}

/// Human-readable summary of a finished upload.
fn report_lines(report: &PackageReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.files.len() + 2);
    match &report.package_id {
        Some(id) => lines.push(format!("package: {id}")),
        None => lines.push("package: not created".to_string()),
    }

    for file in &report.files {
        let line = match &file.outcome {
            FileOutcome::Finalized(done) => format!(
                "  ok      {} ({}, {} part(s))",
                file.path.display(),
                done.file_id,
                done.part_count
            ),
            FileOutcome::Failed(failure) => {
                let mut line = format!("  failed  {}: {}", file.path.display(), failure.error);
                if !failure.succeeded_parts.is_empty() {
                    line.push_str(&format!(
                        " ({} part(s) uploaded)",
                        failure.succeeded_parts.len()
                    ));
                }
                line
            }
            FileOutcome::Skipped => format!("  skipped {}", file.path.display()),
        };
        lines.push(line);
    }

    lines.push(match report.outcome() {
        PackageOutcome::Complete => "status: complete".to_string(),
        PackageOutcome::PartialSuccess => "status: partial".to_string(),
        PackageOutcome::Failed => match &report.error {
            Some(e) => format!("status: failed ({e})"),
            None => "status: failed".to_string(),
        },
    });
    lines
}
