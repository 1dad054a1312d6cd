//! Package upload orchestrator.
//!
//! Owns the progress channel and cancellation token for one upload and
//! wires them into a fresh [`UploadCoordinator`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::coordinator::UploadCoordinator;
use crate::service::{DeliveryService, PartUploader};
use crate::types::{PackageOutcome, PackageReport, UploadEvent};

/// What to upload and to whom.
#[derive(Debug, Clone, Default)]
pub struct PackageRequest {
    pub name: String,
    pub description: String,
    pub recipients: Vec<String>,
    pub files: Vec<PathBuf>,
}

/// Runs package uploads and reports progress.
pub struct PackageOrchestrator {
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl Default for PackageOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageOrchestrator {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Uploads started before this call report no events. The receiver must
    /// be drained: lifecycle events wait for room, part progress is dropped
    /// when the channel is full.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Token that cancels the running upload.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `request.files` into a new package.
    pub async fn upload(
        &self,
        config: SessionConfig,
        service: Arc<dyn DeliveryService>,
        uploader: Arc<dyn PartUploader>,
        request: &PackageRequest,
    ) -> PackageReport {
        let mut coordinator = match UploadCoordinator::new(config, service, uploader) {
            // Events are only sent once someone holds the receiver.
            Ok(c) if self.events_rx.is_none() => c
                .with_cancel(self.cancel.clone())
                .with_events(self.events_tx.clone()),
            Ok(c) => c.with_cancel(self.cancel.clone()),
            Err(e) => {
                error!(error = %e, "invalid upload configuration");
                return PackageReport {
                    package_id: None,
                    files: Vec::new(),
                    package_finalized: false,
                    error: Some(e),
                };
            }
        };

        info!(
            name = %request.name,
            files = request.files.len(),
            recipients = request.recipients.len(),
            "package upload started"
        );
        let report = coordinator
            .upload_package(
                &request.name,
                &request.description,
                &request.recipients,
                &request.files,
            )
            .await;

        match report.outcome() {
            PackageOutcome::Complete => {
                info!(
                    package_id = ?report.package_id,
                    files = report.files.len(),
                    "package upload completed"
                );
            }
            PackageOutcome::PartialSuccess => {
                warn!(
                    package_id = ?report.package_id,
                    finalized = report.finalized_count(),
                    files = report.files.len(),
                    "package upload partially succeeded"
                );
            }
            PackageOutcome::Failed => {
                error!(
                    package_id = ?report.package_id,
                    error = ?report.error,
                    "package upload failed"
                );
            }
        }
        report
    }
}
