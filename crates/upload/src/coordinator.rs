//! Package and file state machine.
//!
//! One coordinator drives one package: it registers each file, plans its
//! parts, uploads them with bounded concurrency and commits the file with
//! its sorted part list. Files are processed strictly one after another;
//! only the parts of the current file run in parallel.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use packdrop_protocol::constants::{BLUEPRINT_METHOD, FILE_KIND};
use packdrop_protocol::messages::{ChunkExtra, FileExtras, FinalizeFileRequest, RegisterFileRequest};
use packdrop_protocol::types::{PartDestination, PartLimits, PartResult};
use packdrop_transfer::{
    ChunkReader, FileTransferDescriptor, SpeedCalculator, TransferError, UploadSource,
    check_limits, resolve_upload_source,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{ServiceError, UploadError};
use crate::retry::{RetryError, retry, with_timeout};
use crate::service::{
    DeliveryService, FileRegistration, PackageHandle, PartTransferError, PartUploader,
};
use crate::session::TransferSession;
use crate::types::{
    CoordinatorState, FileFailure, FileOutcome, FileReport, FinalizeOutcome, FinalizedFile,
    PackageReport, UploadEvent,
};

/// The file currently between registration and finalize.
struct ActiveFile {
    source: UploadSource,
    file_id: String,
    upload_id: String,
    limits: PartLimits,
    plan: Option<PlannedFile>,
    /// Parts confirmed by the storage endpoint, keyed by part number.
    results: BTreeMap<u32, PartResult>,
}

struct PlannedFile {
    descriptor: FileTransferDescriptor,
    reader: ChunkReader,
    requested: BTreeSet<u32>,
}

/// Drives one package through registration, part upload and finalize.
pub struct UploadCoordinator {
    config: SessionConfig,
    service: Arc<dyn DeliveryService>,
    uploader: Arc<dyn PartUploader>,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<UploadEvent>>,
    state: CoordinatorState,
    session: Option<TransferSession>,
    active: Option<ActiveFile>,
    /// Files begun but not yet finalized.
    unfinished: BTreeSet<PathBuf>,
    speed: SpeedCalculator,
}

impl UploadCoordinator {
    /// Creates a coordinator in the `Created` state.
    pub fn new(
        config: SessionConfig,
        service: Arc<dyn DeliveryService>,
        uploader: Arc<dyn PartUploader>,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self {
            config,
            service,
            uploader,
            cancel: CancellationToken::new(),
            events: None,
            state: CoordinatorState::Created,
            session: None,
            active: None,
            unfinished: BTreeSet::new(),
            speed: SpeedCalculator::default(),
        })
    }

    /// Uses `cancel` instead of the coordinator's own token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sends progress events to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<UploadEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Id of the open package; `None` before `open_package` and after the
    /// session is discarded.
    pub fn package_id(&self) -> Option<&str> {
        self.session.as_ref().map(TransferSession::package_id)
    }

    pub fn current_file_id(&self) -> Option<&str> {
        self.session.as_ref().and_then(TransferSession::current_file_id)
    }

    /// Part numbers of the current file already confirmed, ascending.
    pub fn succeeded_parts(&self) -> Vec<u32> {
        self.active
            .as_ref()
            .map(|a| a.results.keys().copied().collect())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Package
    // -----------------------------------------------------------------------

    /// Creates the remote package. `Created → PackageOpen`.
    pub async fn open_package(
        &mut self,
        name: &str,
        description: &str,
        recipients: &[String],
    ) -> Result<(), UploadError> {
        self.require("open_package", &[CoordinatorState::Created])?;
        self.check_cancelled()?;

        let service = &*self.service;
        let timeout = self.config.request_timeout;
        let policy = &self.config.retry;
        let result = retry(
            policy,
            policy.max_attempts,
            &self.cancel,
            |attempt, e: &ServiceError, delay| {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "package create failed, retrying"
                );
            },
            move |_| with_timeout(timeout, service.create_package(name, description, recipients)),
        )
        .await;

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                self.state = CoordinatorState::Aborted;
                let err = retry_failure(e, |attempts, source| UploadError::PackageCreate {
                    attempts,
                    source,
                });
                error!(error = %err, "package create failed");
                return Err(err);
            }
        };

        info!(package_id = %handle.package_id, recipients = recipients.len(), "package opened");
        let package_id = handle.package_id.clone();
        self.session = Some(TransferSession::new(handle));
        self.state = CoordinatorState::PackageOpen;
        self.emit(UploadEvent::PackageOpened { package_id }).await;
        Ok(())
    }

    /// Commits the package. `FileDone | FileAborted → PackageFinalizing → PackageDone`.
    ///
    /// Every registered file must be finalized or dropped with
    /// [`abandon_file`](Self::abandon_file), and at least one file must be
    /// finalized. A failure leaves the package open and the coordinator in
    /// its previous state, so the call can be repeated.
    pub async fn finalize_package(&mut self) -> Result<(), UploadError> {
        self.require(
            "finalize_package",
            &[CoordinatorState::FileDone, CoordinatorState::FileAborted],
        )?;
        if !self.unfinished.is_empty() {
            return Err(UploadError::UnfinishedFiles {
                paths: self.unfinished.iter().cloned().collect(),
            });
        }
        if self
            .session
            .as_ref()
            .is_none_or(|s| s.finalized_count() == 0)
        {
            return Err(self.invalid("finalize_package"));
        }
        self.check_cancelled()?;

        let previous = self.state;
        self.state = CoordinatorState::PackageFinalizing;
        let result = self.submit_package_finalize().await;
        match result {
            Ok(package_id) => {
                self.state = CoordinatorState::PackageDone;
                self.session = None;
                self.active = None;
                info!(package_id = %package_id, "package finalized");
                self.emit(UploadEvent::PackageFinalized { package_id }).await;
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                error!(error = %e, "package finalize failed");
                Err(e)
            }
        }
    }

    /// Abandons the session. The remote package is left as it is.
    pub fn abort(&mut self) {
        if self.state != CoordinatorState::PackageDone {
            warn!(state = ?self.state, package_id = ?self.package_id(), "upload session aborted");
            self.state = CoordinatorState::Aborted;
        }
        self.session = None;
        self.active = None;
    }

    // -----------------------------------------------------------------------
    // File
    // -----------------------------------------------------------------------

    /// Registers `path` with the package and initiates its upload.
    /// `PackageOpen | FileDone | FileAborted → FileRegistering`.
    pub async fn begin_file(&mut self, path: &Path) -> Result<(), UploadError> {
        self.require(
            "begin_file",
            &[
                CoordinatorState::PackageOpen,
                CoordinatorState::FileDone,
                CoordinatorState::FileAborted,
            ],
        )?;
        self.check_cancelled()?;

        self.state = CoordinatorState::FileRegistering;
        self.active = None;

        // Only a registered file can block the package finalize.
        let result = self.register(path).await;
        match result {
            Ok(active) => {
                self.unfinished.insert(active.source.path.clone());
                info!(
                    file = %path.display(),
                    file_id = %active.file_id,
                    upload_id = %active.upload_id,
                    "file registered"
                );
                if let Some(session) = self.session.as_mut() {
                    session.begin_file(active.file_id.clone(), active.upload_id.clone());
                }
                self.active = Some(active);
                Ok(())
            }
            Err(e) => Err(self.settle_file_error(e)),
        }
    }

    /// Plans the current file from its on-disk size and requests exactly
    /// that many part destinations, sorted by part number.
    pub async fn plan_and_fetch_destinations(
        &mut self,
    ) -> Result<Vec<PartDestination>, UploadError> {
        self.require(
            "plan_and_fetch_destinations",
            &[CoordinatorState::FileRegistering],
        )?;
        self.check_cancelled()?;
        let Some(active) = self.active.as_ref() else {
            return Err(self.invalid("plan_and_fetch_destinations"));
        };

        let result = self.fetch_destinations(active).await;
        match result {
            Ok((plan, destinations)) => {
                let event = UploadEvent::FileStarted {
                    path: plan.descriptor.local_path().to_path_buf(),
                    size_bytes: plan.descriptor.size_bytes(),
                    part_count: plan.descriptor.part_count(),
                };
                if let Some(active) = self.active.as_mut() {
                    active.plan = Some(plan);
                }
                self.speed.reset();
                self.emit(event).await;
                Ok(destinations)
            }
            Err(e) => Err(self.settle_file_error(e)),
        }
    }

    /// Uploads every part in `destinations` that has not succeeded yet.
    ///
    /// Returns the results of all confirmed parts of the file, ascending.
    /// The first part to exhaust its retries stops the remaining transfers
    /// and leaves the file in `FileAborted`; calling again with the same
    /// destinations resumes with the parts that are still missing.
    pub async fn upload_parts(
        &mut self,
        destinations: &[PartDestination],
    ) -> Result<Vec<PartResult>, UploadError> {
        self.require(
            "upload_parts",
            &[
                CoordinatorState::FileRegistering,
                CoordinatorState::FileUploading,
                CoordinatorState::FileAborted,
            ],
        )?;
        if !self.active.as_ref().is_some_and(|a| a.plan.is_some()) {
            return Err(self.invalid("upload_parts"));
        }
        self.check_cancelled()?;

        self.state = CoordinatorState::FileUploading;
        let (uploaded, outcome) = self.transfer_parts(destinations).await;
        if let Some(active) = self.active.as_mut() {
            for part in uploaded {
                active.results.insert(part.part_number, part);
            }
        }

        match outcome {
            Ok(()) => Ok(self
                .active
                .as_ref()
                .map(|a| a.results.values().cloned().collect())
                .unwrap_or_default()),
            Err(e) => {
                error!(succeeded = ?self.succeeded_parts(), error = %e, "part upload aborted");
                Err(self.settle_file_error(e))
            }
        }
    }

    /// Commits the current file with `results`.
    /// `FileUploading → FileFinalizing → FileDone`.
    ///
    /// The result set must match the requested part numbers exactly. After
    /// a successful finalize, calling again returns
    /// [`FinalizeOutcome::AlreadyFinalized`] without contacting the service.
    pub async fn finalize_file(
        &mut self,
        results: &[PartResult],
    ) -> Result<FinalizeOutcome, UploadError> {
        if self.state == CoordinatorState::FileDone && self.current_file_finalized() {
            debug!(file_id = ?self.current_file_id(), "file already finalized");
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }
        self.require("finalize_file", &[CoordinatorState::FileUploading])?;
        self.check_cancelled()?;

        let request = self.finalize_request(results)?;
        self.state = CoordinatorState::FileFinalizing;
        let result = self.submit_file_finalize(&request).await;
        match result {
            Ok(()) => {
                self.state = CoordinatorState::FileDone;
                let Some(active) = self.active.as_ref() else {
                    return Err(self.invalid("finalize_file"));
                };
                let path = active.source.path.clone();
                let file_id = active.file_id.clone();
                if let Some(session) = self.session.as_mut() {
                    session.mark_finalized(&file_id);
                }
                self.unfinished.remove(&path);
                info!(
                    file = %path.display(),
                    file_id = %file_id,
                    parts = request.chunk_extras.len(),
                    "file finalized"
                );
                self.emit(UploadEvent::FileFinalized { path, file_id }).await;
                Ok(FinalizeOutcome::Finalized)
            }
            Err(e) => {
                self.state = CoordinatorState::FileUploading;
                error!(error = %e, "file finalize failed");
                Err(e)
            }
        }
    }

    /// Drops the current file from the package so the remaining files can
    /// be finalized without it. Its upload can no longer be resumed.
    ///
    /// Returns the dropped path, or `None` when the file never registered.
    pub fn abandon_file(&mut self) -> Result<Option<PathBuf>, UploadError> {
        self.require(
            "abandon_file",
            &[
                CoordinatorState::FileRegistering,
                CoordinatorState::FileUploading,
                CoordinatorState::FileAborted,
            ],
        )?;
        self.state = CoordinatorState::FileAborted;

        let dropped = self.active.take().map(|a| a.source.path);
        if let Some(path) = &dropped {
            self.unfinished.remove(path);
            warn!(file = %path.display(), "file abandoned");
        }
        Ok(dropped)
    }

    // -----------------------------------------------------------------------
    // Drivers
    // -----------------------------------------------------------------------

    /// Runs register, plan, upload and finalize for one file.
    pub async fn upload_file(&mut self, path: &Path) -> Result<FinalizedFile, FileFailure> {
        let result = self.run_file(path).await;
        match result {
            Ok(file) => Ok(file),
            Err(error) => {
                if matches!(
                    self.state,
                    CoordinatorState::FileRegistering | CoordinatorState::FileUploading
                ) {
                    self.state = CoordinatorState::FileAborted;
                }
                let (upload_id, succeeded_parts) = match &self.active {
                    Some(a) if a.source.path == path => (
                        Some(a.upload_id.clone()),
                        a.results.keys().copied().collect(),
                    ),
                    _ => (None, Vec::new()),
                };
                error!(file = %path.display(), error = %error, "file upload failed");
                self.emit(UploadEvent::FileFailed {
                    path: path.to_path_buf(),
                    error: error.to_string(),
                })
                .await;
                Err(FileFailure {
                    path: path.to_path_buf(),
                    upload_id,
                    succeeded_parts,
                    error,
                })
            }
        }
    }

    /// Uploads `files` into a new package, one file at a time.
    ///
    /// A file-scoped failure is recorded and the next file proceeds; a
    /// package-scoped failure (cancellation, for instance) marks the
    /// remaining files as skipped. The package is finalized only when every
    /// file was finalized; otherwise it stays open for a later retry.
    pub async fn upload_package(
        &mut self,
        name: &str,
        description: &str,
        recipients: &[String],
        files: &[PathBuf],
    ) -> PackageReport {
        let mut report = PackageReport {
            package_id: None,
            files: Vec::with_capacity(files.len()),
            package_finalized: false,
            error: None,
        };
        if files.is_empty() {
            report.error = Some(UploadError::Config("no files to upload".into()));
            return report;
        }

        if let Err(e) = self.open_package(name, description, recipients).await {
            report.files.extend(files.iter().map(|p| skipped(p)));
            report.error = Some(e);
            return report;
        }
        report.package_id = self.package_id().map(str::to_string);

        let mut remaining = files.iter();
        while let Some(path) = remaining.next() {
            let result = self.upload_file(path).await;
            match result {
                Ok(file) => report.files.push(FileReport {
                    path: path.clone(),
                    outcome: FileOutcome::Finalized(file),
                }),
                Err(failure) => {
                    let package_scoped = !failure.error.is_file_scoped();
                    report.files.push(FileReport {
                        path: path.clone(),
                        outcome: FileOutcome::Failed(failure),
                    });
                    if package_scoped {
                        report.files.extend(remaining.map(|p| skipped(p)));
                        self.abort();
                        return report;
                    }
                }
            }
        }

        let finalized = report.finalized_count();
        if finalized < files.len() {
            warn!(
                package_id = ?report.package_id,
                finalized,
                failed = files.len() - finalized,
                "package left open with failed files"
            );
            return report;
        }

        match self.finalize_package().await {
            Ok(()) => report.package_finalized = true,
            Err(e) => report.error = Some(e),
        }
        report
    }

    async fn run_file(&mut self, path: &Path) -> Result<FinalizedFile, UploadError> {
        self.begin_file(path).await?;
        let destinations = self.plan_and_fetch_destinations().await?;
        let results = self.upload_parts(&destinations).await?;
        self.finalize_file(&results).await?;

        let (active, plan) = self.planned("upload_file")?;
        Ok(FinalizedFile {
            path: plan.descriptor.local_path().to_path_buf(),
            file_id: active.file_id.clone(),
            upload_id: active.upload_id.clone(),
            size_bytes: plan.descriptor.size_bytes(),
            part_count: plan.descriptor.part_count(),
        })
    }

    // -----------------------------------------------------------------------
    // Service calls
    // -----------------------------------------------------------------------

    async fn register(&self, path: &Path) -> Result<ActiveFile, UploadError> {
        let package = self.package()?;
        let source = resolve_upload_source(path)?;
        let request = RegisterFileRequest {
            kind: FILE_KIND.to_string(),
            name: source.file_name.clone(),
            path: source.dir_path.clone(),
            last_modified: DateTime::<Utc>::from(source.modified).to_rfc3339(),
        };

        let service = &*self.service;
        let timeout = self.config.request_timeout;
        let policy = &self.config.retry;
        let request = &request;
        let registration = retry(
            policy,
            policy.max_attempts,
            &self.cancel,
            |attempt, e: &ServiceError, delay| {
                warn!(
                    file = %path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "file register failed, retrying"
                );
            },
            move |_| with_timeout(timeout, service.register_file(package, request)),
        )
        .await
        .map_err(|e| {
            retry_failure(e, |attempts, source| UploadError::FileRegister {
                path: path.to_path_buf(),
                attempts,
                source,
            })
        })?;

        let FileRegistration {
            file_id,
            blueprint,
            limits,
        } = registration;
        if !blueprint.method.eq_ignore_ascii_case(BLUEPRINT_METHOD) {
            return Err(UploadError::UploadInit {
                path: path.to_path_buf(),
                attempts: 1,
                source: ServiceError::Contract(format!(
                    "blueprint method {} is not {BLUEPRINT_METHOD}",
                    blueprint.method
                )),
            });
        }

        let blueprint = &blueprint;
        let upload_id = retry(
            policy,
            policy.max_attempts,
            &self.cancel,
            |attempt, e: &ServiceError, delay| {
                warn!(
                    file = %path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "upload init failed, retrying"
                );
            },
            move |_| with_timeout(timeout, service.initiate_upload(blueprint)),
        )
        .await
        .map_err(|e| {
            retry_failure(e, |attempts, source| UploadError::UploadInit {
                path: path.to_path_buf(),
                attempts,
                source,
            })
        })?;

        Ok(ActiveFile {
            source,
            file_id,
            upload_id,
            limits,
            plan: None,
            results: BTreeMap::new(),
        })
    }

    async fn fetch_destinations(
        &self,
        active: &ActiveFile,
    ) -> Result<(PlannedFile, Vec<PartDestination>), UploadError> {
        let path = &active.source.path;
        let part_size = self.config.part_size;
        let reader = ChunkReader::open(path, part_size)?;
        let descriptor = FileTransferDescriptor::new(path.clone(), reader.file_size(), part_size)?;
        let part_count = descriptor.part_count();
        check_limits(u64::from(part_count), part_size, &active.limits)?;
        debug!(
            file = %path.display(),
            size = descriptor.size_bytes(),
            part_size,
            part_count,
            "planned parts"
        );

        let package = self.package()?;
        let service = &*self.service;
        let timeout = self.config.request_timeout;
        let policy = &self.config.retry;
        let file_id = active.file_id.as_str();
        let upload_id = active.upload_id.as_str();
        let mut destinations = retry(
            policy,
            policy.max_attempts,
            &self.cancel,
            |attempt, e: &ServiceError, delay| {
                warn!(
                    file = %path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "destination fetch failed, retrying"
                );
            },
            move |_| {
                with_timeout(
                    timeout,
                    service.fetch_part_destinations(package, file_id, upload_id, part_count),
                )
            },
        )
        .await
        .map_err(|e| {
            retry_failure(e, |attempts, source| UploadError::DestinationFetch {
                path: path.clone(),
                attempts,
                source,
            })
        })?;

        let mismatch = |detail: String| UploadError::DestinationMismatch {
            path: path.clone(),
            detail,
        };
        if destinations.len() != part_count as usize {
            return Err(mismatch(format!(
                "requested {part_count} destinations, received {}",
                destinations.len()
            )));
        }
        destinations.sort_by_key(|d| d.part_number);
        for (expected, destination) in (1..=part_count).zip(&destinations) {
            if destination.part_number != expected {
                return Err(mismatch(format!(
                    "expected part {expected}, received part {}",
                    destination.part_number
                )));
            }
        }

        let plan = PlannedFile {
            descriptor,
            reader,
            requested: (1..=part_count).collect(),
        };
        Ok((plan, destinations))
    }

    /// Uploads the not-yet-confirmed parts among `destinations`.
    ///
    /// Returns whatever succeeded, even when a later part failed.
    async fn transfer_parts(
        &self,
        destinations: &[PartDestination],
    ) -> (Vec<PartResult>, Result<(), UploadError>) {
        let mut uploaded = Vec::new();
        let Ok((active, plan)) = self.planned("upload_parts") else {
            return (uploaded, Err(self.invalid("upload_parts")));
        };
        let path = plan.descriptor.local_path();

        let mut pending = BTreeMap::new();
        for destination in destinations {
            if !plan.requested.contains(&destination.part_number) {
                return (
                    uploaded,
                    Err(UploadError::DestinationMismatch {
                        path: path.to_path_buf(),
                        detail: format!("part {} was not requested", destination.part_number),
                    }),
                );
            }
            if !active.results.contains_key(&destination.part_number) {
                pending.entry(destination.part_number).or_insert(destination);
            }
        }

        let confirmed: u64 = active
            .results
            .keys()
            .map(|&n| plan.descriptor.part_len(n))
            .sum();
        let uploaded_bytes = AtomicU64::new(confirmed);
        let uploaded_bytes = &uploaded_bytes;

        let workers = self.config.workers_for(plan.descriptor.part_count());
        debug!(
            file = %path.display(),
            pending = pending.len(),
            confirmed = active.results.len(),
            workers,
            "uploading parts"
        );

        let mut transfers = stream::iter(
            pending
                .into_values()
                .map(move |destination| {
                    self.transfer_part(plan, path, destination, uploaded_bytes)
                }),
        )
        .buffer_unordered(workers);

        while let Some(result) = transfers.next().await {
            match result {
                Ok(part) => uploaded.push(part),
                // Dropping the stream aborts the transfers still in flight.
                Err(e) => return (uploaded, Err(e)),
            }
        }
        (uploaded, Ok(()))
    }

    async fn transfer_part(
        &self,
        plan: &PlannedFile,
        path: &Path,
        destination: &PartDestination,
        uploaded_bytes: &AtomicU64,
    ) -> Result<PartResult, UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let part_number = destination.part_number;
        let reader = plan.reader.clone();
        let index = destination.part_index();
        let data = tokio::task::spawn_blocking(move || reader.read_part(index))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;

        let body = Bytes::from(data);
        let bytes = body.len() as u64;
        let uploader = &*self.uploader;
        let limit = self.config.part_timeout;
        let policy = &self.config.retry;
        let part = retry(
            policy,
            policy.max_attempts,
            &self.cancel,
            |attempt, e: &PartTransferError, delay| {
                warn!(
                    file = %path.display(),
                    part = part_number,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e.cause,
                    "part upload failed, retrying"
                );
                self.notify(UploadEvent::PartRetry {
                    path: path.to_path_buf(),
                    part_number,
                    attempt,
                    delay,
                    error: e.cause.to_string(),
                });
            },
            move |_| {
                let body = body.clone();
                async move {
                    tokio::time::timeout(limit, uploader.upload(destination, body))
                        .await
                        .unwrap_or(Err(PartTransferError {
                            part_number,
                            cause: ServiceError::Timeout,
                        }))
                }
            },
        )
        .await
        .map_err(|e| {
            retry_failure(e, |attempts, error: PartTransferError| UploadError::Transfer {
                path: path.to_path_buf(),
                part_number,
                attempts,
                source: error.cause,
            })
        })?;

        let uploaded = uploaded_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.speed.add_sample(bytes);
        let bytes_per_second = self.speed.bytes_per_second();
        let eta = self
            .speed
            .eta(plan.descriptor.size_bytes().saturating_sub(uploaded));
        debug!(file = %path.display(), part = part_number, bytes, "part uploaded");
        // Per-part progress must never stall the transfer on a slow receiver.
        self.notify(UploadEvent::PartUploaded {
            path: path.to_path_buf(),
            part_number,
            bytes,
            uploaded_bytes: uploaded,
            bytes_per_second,
            eta,
        });
        Ok(part)
    }

    /// Validates `results` against the requested parts and builds the
    /// finalize body with parts in ascending order.
    fn finalize_request(&self, results: &[PartResult]) -> Result<FinalizeFileRequest, UploadError> {
        let (active, plan) = self.planned("finalize_file")?;
        let path = &active.source.path;

        let mut sorted: Vec<&PartResult> = results.iter().collect();
        sorted.sort_by_key(|r| r.part_number);
        if let Some(pair) = sorted
            .windows(2)
            .find(|w| w[0].part_number == w[1].part_number)
        {
            return Err(UploadError::DuplicatePart {
                path: path.clone(),
                part_number: pair[0].part_number,
            });
        }

        let received: BTreeSet<u32> = sorted.iter().map(|r| r.part_number).collect();
        let missing: Vec<u32> = plan.requested.difference(&received).copied().collect();
        let unexpected: Vec<u32> = received.difference(&plan.requested).copied().collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(UploadError::IncompleteParts {
                path: path.clone(),
                missing,
                unexpected,
            });
        }

        Ok(FinalizeFileRequest {
            chunk_extras: sorted.into_iter().map(ChunkExtra::from).collect(),
            file_extras: FileExtras {
                upload_id: active.upload_id.clone(),
            },
            size: plan.descriptor.size_bytes(),
            chunk_size: plan.descriptor.part_size_bytes(),
        })
    }

    async fn submit_file_finalize(&self, request: &FinalizeFileRequest) -> Result<(), UploadError> {
        let (active, _) = self.planned("finalize_file")?;
        let path = &active.source.path;
        let package = self.package()?;
        let service = &*self.service;
        let timeout = self.config.request_timeout;
        let policy = &self.config.retry;
        let file_id = active.file_id.as_str();

        // Once submitted, a finalize runs to completion; cancellation was
        // checked before this point.
        let uninterrupted = CancellationToken::new();
        retry(
            policy,
            policy.finalize_attempts,
            &uninterrupted,
            |attempt, e: &ServiceError, delay| {
                warn!(
                    file = %path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "file finalize failed, retrying"
                );
            },
            move |_| with_timeout(timeout, service.finalize_file(package, file_id, request)),
        )
        .await
        .map_err(|e| {
            retry_failure(e, |attempts, source| UploadError::FileFinalize {
                path: path.clone(),
                attempts,
                source,
            })
        })
    }

    async fn submit_package_finalize(&self) -> Result<String, UploadError> {
        let package = self.package()?;
        let service = &*self.service;
        let timeout = self.config.request_timeout;
        let policy = &self.config.retry;

        let uninterrupted = CancellationToken::new();
        retry(
            policy,
            policy.finalize_attempts,
            &uninterrupted,
            |attempt, e: &ServiceError, delay| {
                warn!(
                    package_id = %package.package_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "package finalize failed, retrying"
                );
            },
            move |_| with_timeout(timeout, service.finalize_package(package)),
        )
        .await
        .map_err(|e| {
            retry_failure(e, |attempts, source| UploadError::PackageFinalize {
                package_id: package.package_id.clone(),
                attempts,
                source,
            })
        })?;
        Ok(package.package_id.clone())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require(
        &self,
        operation: &'static str,
        allowed: &[CoordinatorState],
    ) -> Result<(), UploadError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> UploadError {
        UploadError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn check_cancelled(&mut self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            self.state = CoordinatorState::Aborted;
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    /// Moves to the state a failed file operation leaves behind.
    fn settle_file_error(&mut self, error: UploadError) -> UploadError {
        self.state = match error {
            UploadError::Cancelled => CoordinatorState::Aborted,
            _ => CoordinatorState::FileAborted,
        };
        error
    }

    fn package(&self) -> Result<&PackageHandle, UploadError> {
        self.session
            .as_ref()
            .map(TransferSession::package)
            .ok_or_else(|| self.invalid("package access"))
    }

    fn planned(&self, operation: &'static str) -> Result<(&ActiveFile, &PlannedFile), UploadError> {
        self.active
            .as_ref()
            .and_then(|a| a.plan.as_ref().map(|p| (a, p)))
            .ok_or_else(|| self.invalid(operation))
    }

    fn current_file_finalized(&self) -> bool {
        match (&self.session, &self.active) {
            (Some(session), Some(active)) => session.is_finalized(&active.file_id),
            _ => false,
        }
    }

    async fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Non-blocking variant of `emit`. The event is dropped when the
    /// channel is full.
    fn notify(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

fn retry_failure<E>(err: RetryError<E>, wrap: impl FnOnce(u32, E) -> UploadError) -> UploadError {
    match err {
        RetryError::Cancelled => UploadError::Cancelled,
        RetryError::Exhausted { attempts, error } => wrap(attempts, error),
    }
}

fn skipped(path: &Path) -> FileReport {
    FileReport {
        path: path.to_path_buf(),
        outcome: FileOutcome::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    use packdrop_protocol::types::Blueprint;

    use crate::config::Credentials;
    use crate::retry::RetryPolicy;
    use crate::service::ServiceFuture;
    use crate::types::PackageOutcome;

    struct MockService {
        blueprint_method: &'static str,
        short_destinations: bool,
        reject_file: Option<&'static str>,
        fail_create: bool,
        fail_package_finalize: bool,
        calls: Mutex<Vec<&'static str>>,
        finalized: Mutex<Vec<FinalizeFileRequest>>,
    }

    impl Default for MockService {
        fn default() -> Self {
            Self {
                blueprint_method: "POST",
                short_destinations: false,
                reject_file: None,
                fail_create: false,
                fail_package_finalize: false,
                calls: Mutex::new(Vec::new()),
                finalized: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockService {
        fn record(&self, call: &'static str) -> usize {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            calls.iter().filter(|c| **c == call).count()
        }

        fn count(&self, call: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| **c == call)
                .count()
        }
    }

    impl DeliveryService for MockService {
        fn create_package<'a>(
            &'a self,
            _name: &'a str,
            _description: &'a str,
            _recipients: &'a [String],
        ) -> ServiceFuture<'a, PackageHandle> {
            Box::pin(async move {
                self.record("create_package");
                if self.fail_create {
                    return Err(ServiceError::Status {
                        status: 401,
                        body: "bad token".into(),
                    });
                }
                Ok(PackageHandle {
                    package_id: "pkg-1".into(),
                    package_token: "pkg-token".into(),
                })
            })
        }

        fn register_file<'a>(
            &'a self,
            package: &'a PackageHandle,
            file: &'a RegisterFileRequest,
        ) -> ServiceFuture<'a, FileRegistration> {
            Box::pin(async move {
                let n = self.record("register_file");
                assert_eq!(package.package_token, "pkg-token");
                assert_eq!(file.kind, "file");
                if self.reject_file == Some(file.name.as_str()) {
                    return Err(ServiceError::Status {
                        status: 400,
                        body: "invalid name".into(),
                    });
                }
                Ok(FileRegistration {
                    file_id: format!("file-{n}"),
                    blueprint: Blueprint {
                        method: self.blueprint_method.into(),
                        url: "https://storage.test/init".into(),
                        headers: HashMap::new(),
                    },
                    limits: PartLimits::default(),
                })
            })
        }

        fn initiate_upload<'a>(&'a self, _blueprint: &'a Blueprint) -> ServiceFuture<'a, String> {
            Box::pin(async move {
                let n = self.record("initiate_upload");
                Ok(format!("upload-{n}"))
            })
        }

        fn fetch_part_destinations<'a>(
            &'a self,
            _package: &'a PackageHandle,
            file_id: &'a str,
            _upload_id: &'a str,
            part_count: u32,
        ) -> ServiceFuture<'a, Vec<PartDestination>> {
            Box::pin(async move {
                self.record("fetch_part_destinations");
                let count = if self.short_destinations {
                    part_count - 1
                } else {
                    part_count
                };
                // Reverse order: the coordinator must sort.
                Ok((1..=count)
                    .rev()
                    .map(|n| PartDestination {
                        part_number: n,
                        url: format!("https://storage.test/{file_id}/{n}"),
                    })
                    .collect())
            })
        }

        fn finalize_file<'a>(
            &'a self,
            _package: &'a PackageHandle,
            _file_id: &'a str,
            request: &'a FinalizeFileRequest,
        ) -> ServiceFuture<'a, ()> {
            Box::pin(async move {
                self.record("finalize_file");
                self.finalized.lock().unwrap().push(request.clone());
                Ok(())
            })
        }

        fn finalize_package<'a>(&'a self, _package: &'a PackageHandle) -> ServiceFuture<'a, ()> {
            Box::pin(async move {
                self.record("finalize_package");
                if self.fail_package_finalize {
                    return Err(ServiceError::Status {
                        status: 503,
                        body: "unavailable".into(),
                    });
                }
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct MockUploader {
        /// Transient failures left per part number.
        transient: Mutex<HashMap<u32, u32>>,
        /// Part that is rejected with a non-retryable status.
        rejected: Mutex<Option<u32>>,
        attempts: Mutex<HashMap<u32, u32>>,
        bodies: Mutex<BTreeMap<u32, Vec<u8>>>,
    }

    impl MockUploader {
        fn attempts(&self, part: u32) -> u32 {
            self.attempts.lock().unwrap().get(&part).copied().unwrap_or(0)
        }
    }

    impl PartUploader for MockUploader {
        fn upload<'a>(
            &'a self,
            destination: &'a PartDestination,
            body: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<PartResult, PartTransferError>> + Send + 'a>>
        {
            Box::pin(async move {
                let part_number = destination.part_number;
                *self.attempts.lock().unwrap().entry(part_number).or_insert(0) += 1;

                if *self.rejected.lock().unwrap() == Some(part_number) {
                    return Err(PartTransferError {
                        part_number,
                        cause: ServiceError::Status {
                            status: 403,
                            body: "signature expired".into(),
                        },
                    });
                }
                if let Some(left) = self.transient.lock().unwrap().get_mut(&part_number) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(PartTransferError {
                            part_number,
                            cause: ServiceError::Transport("connection reset".into()),
                        });
                    }
                }

                self.bodies.lock().unwrap().insert(part_number, body.to_vec());
                Ok(PartResult {
                    part_number,
                    integrity_token: format!("\"etag-{part_number}\""),
                })
            })
        }
    }

    fn test_config(part_size: u64) -> SessionConfig {
        let mut config = SessionConfig::new(Credentials {
            user_token: "user-token".into(),
            team_id: "team-1".into(),
        });
        config.part_size = part_size;
        config.request_timeout = Duration::from_secs(5);
        config.part_timeout = Duration::from_secs(5);
        config.retry = RetryPolicy {
            max_attempts: 5,
            finalize_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_factor: 2.0,
        };
        config
    }

    fn coordinator(
        config: SessionConfig,
        service: &Arc<MockService>,
        uploader: &Arc<MockUploader>,
    ) -> UploadCoordinator {
        UploadCoordinator::new(config, service.clone(), uploader.clone()).unwrap()
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn open(coord: &mut UploadCoordinator) {
        coord
            .open_package("Dailies", "reel 3", &["editor@example.com".to_string()])
            .await
            .unwrap();
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = test_config(4);
        config.credentials.user_token.clear();
        let result = UploadCoordinator::new(
            config,
            Arc::new(MockService::default()),
            Arc::new(MockUploader::default()),
        );
        assert!(matches!(result, Err(UploadError::Config(_))));
    }

    #[tokio::test]
    async fn zero_byte_file_uploads_one_empty_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.txt", b"");
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        let file = coord.upload_file(&path).await.unwrap();

        assert_eq!(file.part_count, 1);
        assert_eq!(file.size_bytes, 0);
        assert_eq!(uploader.bodies.lock().unwrap().get(&1), Some(&Vec::new()));
        let finalized = service.finalized.lock().unwrap();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].chunk_extras.len(), 1);
        assert_eq!(finalized[0].size, 0);
        assert_eq!(coord.state(), CoordinatorState::FileDone);
    }

    #[tokio::test]
    async fn destination_mismatch_before_any_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "clip.mov", &[7u8; 12]);
        let service = Arc::new(MockService {
            short_destinations: true,
            ..Default::default()
        });
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        coord.begin_file(&path).await.unwrap();
        let err = coord.plan_and_fetch_destinations().await.unwrap_err();

        assert!(matches!(err, UploadError::DestinationMismatch { .. }));
        assert!(err.to_string().contains("requested 3 destinations, received 2"));
        assert!(uploader.attempts.lock().unwrap().is_empty());
        assert_eq!(service.count("fetch_part_destinations"), 1);
        assert_eq!(service.count("finalize_file"), 0);
        assert_eq!(coord.state(), CoordinatorState::FileAborted);
    }

    #[tokio::test]
    async fn retried_part_does_not_reupload_others() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0u8..10).collect();
        let path = write_file(&dir, "take.wav", &data);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        uploader.transient.lock().unwrap().insert(2, 3);
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        let file = coord.upload_file(&path).await.unwrap();

        assert_eq!(file.part_count, 3);
        assert_eq!(uploader.attempts(1), 1);
        assert_eq!(uploader.attempts(2), 4);
        assert_eq!(uploader.attempts(3), 1);

        let finalized = service.finalized.lock().unwrap();
        let parts: Vec<u32> = finalized[0].chunk_extras.iter().map(|c| c.part_number).collect();
        assert_eq!(parts, vec![1, 2, 3]);
        assert_eq!(finalized[0].chunk_extras[1].etag, "\"etag-2\"");
        assert_eq!(finalized[0].size, 10);
        assert_eq!(finalized[0].chunk_size, 4);
        assert_eq!(finalized[0].file_extras.upload_id, file.upload_id);

        let joined: Vec<u8> = uploader
            .bodies
            .lock()
            .unwrap()
            .values()
            .flatten()
            .copied()
            .collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn finalize_file_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", &[1u8; 9]);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        coord.begin_file(&path).await.unwrap();
        let destinations = coord.plan_and_fetch_destinations().await.unwrap();
        let numbers: Vec<u32> = destinations.iter().map(|d| d.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let results = coord.upload_parts(&destinations).await.unwrap();
        assert_eq!(
            coord.finalize_file(&results).await.unwrap(),
            FinalizeOutcome::Finalized
        );
        assert_eq!(
            coord.finalize_file(&results).await.unwrap(),
            FinalizeOutcome::AlreadyFinalized
        );
        assert_eq!(service.count("finalize_file"), 1);
    }

    #[tokio::test]
    async fn incomplete_or_duplicate_results_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", &[1u8; 12]);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        coord.begin_file(&path).await.unwrap();
        let destinations = coord.plan_and_fetch_destinations().await.unwrap();
        let results = coord.upload_parts(&destinations).await.unwrap();

        let partial = vec![results[0].clone(), results[2].clone()];
        match coord.finalize_file(&partial).await {
            Err(UploadError::IncompleteParts {
                missing,
                unexpected,
                ..
            }) => {
                assert_eq!(missing, vec![2]);
                assert!(unexpected.is_empty());
            }
            other => panic!("expected IncompleteParts, got {other:?}"),
        }

        let mut duplicated = results.clone();
        duplicated.push(results[1].clone());
        assert!(matches!(
            coord.finalize_file(&duplicated).await,
            Err(UploadError::DuplicatePart { part_number: 2, .. })
        ));

        assert_eq!(service.count("finalize_file"), 0);
        assert_eq!(coord.state(), CoordinatorState::FileUploading);

        coord.finalize_file(&results).await.unwrap();
        assert_eq!(service.count("finalize_file"), 1);
    }

    #[tokio::test]
    async fn rejected_part_aborts_file_and_resume_skips_confirmed_parts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", &[3u8; 12]);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        *uploader.rejected.lock().unwrap() = Some(2);
        let mut config = test_config(4);
        config.max_concurrency = 1;
        let mut coord = coordinator(config, &service, &uploader);

        open(&mut coord).await;
        coord.begin_file(&path).await.unwrap();
        let destinations = coord.plan_and_fetch_destinations().await.unwrap();
        let err = coord.upload_parts(&destinations).await.unwrap_err();

        assert!(matches!(
            err,
            UploadError::Transfer {
                part_number: 2,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(coord.state(), CoordinatorState::FileAborted);
        assert_eq!(coord.succeeded_parts(), vec![1]);
        assert_eq!(uploader.attempts(3), 0);

        *uploader.rejected.lock().unwrap() = None;
        let results = coord.upload_parts(&destinations).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(uploader.attempts(1), 1);
        coord.finalize_file(&results).await.unwrap();
    }

    #[tokio::test]
    async fn non_post_blueprint_fails_before_initiation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", b"data");
        let service = Arc::new(MockService {
            blueprint_method: "GET",
            ..Default::default()
        });
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        let err = coord.begin_file(&path).await.unwrap_err();

        assert!(matches!(
            err,
            UploadError::UploadInit {
                source: ServiceError::Contract(_),
                ..
            }
        ));
        assert_eq!(service.count("initiate_upload"), 0);
        assert_eq!(coord.state(), CoordinatorState::FileAborted);
    }

    #[tokio::test]
    async fn missing_file_is_rejected_before_registration() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        let err = coord.begin_file(&dir.path().join("gone.bin")).await.unwrap_err();

        assert!(matches!(err, UploadError::Local(TransferError::InvalidPath(_))));
        assert_eq!(service.count("register_file"), 0);
        assert_eq!(coord.state(), CoordinatorState::FileAborted);
    }

    #[tokio::test]
    async fn cancellation_blocks_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", &[1u8; 8]);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);
        let cancel = coord.cancel_token();

        open(&mut coord).await;
        coord.begin_file(&path).await.unwrap();
        let destinations = coord.plan_and_fetch_destinations().await.unwrap();
        let results = coord.upload_parts(&destinations).await.unwrap();

        cancel.cancel();
        assert!(matches!(
            coord.finalize_file(&results).await,
            Err(UploadError::Cancelled)
        ));
        assert_eq!(service.count("finalize_file"), 0);
        assert_eq!(coord.state(), CoordinatorState::Aborted);
    }

    #[tokio::test]
    async fn cancelled_before_upload_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", &[1u8; 8]);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let cancel = CancellationToken::new();
        let mut coord =
            coordinator(test_config(4), &service, &uploader).with_cancel(cancel.clone());

        open(&mut coord).await;
        coord.begin_file(&path).await.unwrap();
        let destinations = coord.plan_and_fetch_destinations().await.unwrap();
        cancel.cancel();

        assert!(matches!(
            coord.upload_parts(&destinations).await,
            Err(UploadError::Cancelled)
        ));
        assert!(uploader.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn operations_out_of_order_are_rejected() {
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        assert!(matches!(
            coord.finalize_package().await,
            Err(UploadError::InvalidState {
                operation: "finalize_package",
                state: CoordinatorState::Created,
            })
        ));
        assert!(matches!(
            coord.plan_and_fetch_destinations().await,
            Err(UploadError::InvalidState { .. })
        ));
        assert_eq!(coord.state(), CoordinatorState::Created);
    }

    #[tokio::test]
    async fn never_registered_file_does_not_block_package_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(&dir, "a.bin", b"first");
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        coord.begin_file(&dir.path().join("missing.bin")).await.unwrap_err();
        coord.upload_file(&a).await.unwrap();
        coord.finalize_package().await.unwrap();

        assert_eq!(service.count("register_file"), 1);
        assert_eq!(service.count("finalize_package"), 1);
        assert_eq!(coord.state(), CoordinatorState::PackageDone);
    }

    #[tokio::test]
    async fn abandoned_file_lets_the_rest_of_the_package_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(&dir, "a.bin", b"first");
        let b = write_file(&dir, "b.bin", b"second");
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        open(&mut coord).await;
        coord.upload_file(&a).await.unwrap();
        *uploader.rejected.lock().unwrap() = Some(1);
        let failure = coord.upload_file(&b).await.unwrap_err();
        assert!(failure.upload_id.is_some());
        assert_eq!(coord.state(), CoordinatorState::FileAborted);

        let Err(UploadError::UnfinishedFiles { paths }) = coord.finalize_package().await else {
            panic!("expected the registered file to block finalize");
        };
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("b.bin"));
        assert_eq!(service.count("finalize_package"), 0);

        assert_eq!(coord.abandon_file().unwrap(), Some(b));
        assert_eq!(coord.state(), CoordinatorState::FileAborted);
        coord.finalize_package().await.unwrap();
        assert_eq!(service.count("finalize_package"), 1);
        assert_eq!(coord.state(), CoordinatorState::PackageDone);
    }

    #[tokio::test]
    async fn package_without_finalized_files_is_not_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        assert!(matches!(
            coord.abandon_file(),
            Err(UploadError::InvalidState {
                operation: "abandon_file",
                state: CoordinatorState::Created,
            })
        ));

        open(&mut coord).await;
        coord.begin_file(&dir.path().join("missing.bin")).await.unwrap_err();
        assert_eq!(coord.abandon_file().unwrap(), None);
        assert!(matches!(
            coord.finalize_package().await,
            Err(UploadError::InvalidState {
                operation: "finalize_package",
                ..
            })
        ));
        assert_eq!(service.count("finalize_package"), 0);
    }

    struct HangingUploader {
        started: tokio::sync::Notify,
        calls: std::sync::atomic::AtomicU32,
    }

    impl PartUploader for HangingUploader {
        fn upload<'a>(
            &'a self,
            _destination: &'a PartDestination,
            _body: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<PartResult, PartTransferError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.started.notify_one();
                std::future::pending().await
            })
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_part_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", &[9u8; 12]);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(HangingUploader {
            started: tokio::sync::Notify::new(),
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let mut config = test_config(4);
        config.max_concurrency = 1;
        let mut coord = UploadCoordinator::new(config, service.clone(), uploader.clone()).unwrap();
        let cancel = coord.cancel_token();

        open(&mut coord).await;
        coord.begin_file(&path).await.unwrap();
        let destinations = coord.plan_and_fetch_destinations().await.unwrap();

        let (result, ()) = tokio::join!(coord.upload_parts(&destinations), async {
            uploader.started.notified().await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
        assert!(coord.succeeded_parts().is_empty());
        assert_eq!(coord.state(), CoordinatorState::Aborted);
        assert_eq!(service.count("finalize_file"), 0);
    }

    #[tokio::test]
    async fn part_events_report_file_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.bin", &[5u8; 10]);
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let (tx, mut rx) = mpsc::channel(16);
        let mut coord = coordinator(test_config(4), &service, &uploader).with_events(tx);

        open(&mut coord).await;
        coord.upload_file(&path).await.unwrap();
        drop(coord);

        let mut parts = Vec::new();
        while let Some(event) = rx.recv().await {
            if let UploadEvent::PartUploaded {
                path: event_path,
                bytes,
                uploaded_bytes,
                ..
            } = event
            {
                assert_eq!(event_path, path);
                parts.push((bytes, uploaded_bytes));
            }
        }
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.iter().map(|(b, _)| b).sum::<u64>(), 10);
        assert_eq!(parts.iter().map(|(_, u)| *u).max(), Some(10));
        assert!(parts.iter().all(|(b, u)| u >= b));
    }

    #[tokio::test]
    async fn upload_package_complete() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write_file(&dir, "a.bin", &[1u8; 10]),
            write_file(&dir, "b.bin", &[2u8; 3]),
        ];
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let (tx, mut rx) = mpsc::channel(256);
        let mut coord = coordinator(test_config(4), &service, &uploader).with_events(tx);

        let report = coord
            .upload_package("Dailies", "", &["editor@example.com".to_string()], &files)
            .await;

        assert_eq!(report.outcome(), PackageOutcome::Complete);
        assert_eq!(report.package_id.as_deref(), Some("pkg-1"));
        assert_eq!(report.finalized_count(), 2);
        assert_eq!(service.count("finalize_file"), 2);
        assert_eq!(service.count("finalize_package"), 1);
        assert_eq!(coord.state(), CoordinatorState::PackageDone);
        assert!(coord.package_id().is_none());

        drop(coord);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert!(matches!(events.first(), Some(UploadEvent::PackageOpened { .. })));
        assert!(matches!(events.last(), Some(UploadEvent::PackageFinalized { .. })));
        let uploaded = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::PartUploaded { .. }))
            .count();
        assert_eq!(uploaded, 4);
    }

    #[tokio::test]
    async fn upload_package_partial_when_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write_file(&dir, "a.bin", b"one"),
            write_file(&dir, "b.bin", b"two"),
            write_file(&dir, "c.bin", b"three"),
        ];
        let service = Arc::new(MockService {
            reject_file: Some("b.bin"),
            ..Default::default()
        });
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        let report = coord.upload_package("Dailies", "", &[], &files).await;

        assert_eq!(report.outcome(), PackageOutcome::PartialSuccess);
        assert_eq!(report.finalized_count(), 2);
        assert!(!report.package_finalized);
        assert_eq!(service.count("finalize_package"), 0);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].path.ends_with("b.bin"));
        assert!(matches!(
            failures[0].error,
            UploadError::FileRegister { attempts: 1, .. }
        ));
        assert!(failures[0].upload_id.is_none());
    }

    #[tokio::test]
    async fn package_finalize_failure_is_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![write_file(&dir, "a.bin", b"payload")];
        let service = Arc::new(MockService {
            fail_package_finalize: true,
            ..Default::default()
        });
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        let report = coord.upload_package("Dailies", "", &[], &files).await;

        assert_eq!(report.outcome(), PackageOutcome::PartialSuccess);
        assert!(matches!(
            report.error,
            Some(UploadError::PackageFinalize { attempts: 2, .. })
        ));
        assert_eq!(service.count("finalize_package"), 2);
        assert_eq!(coord.state(), CoordinatorState::FileDone);
        assert_eq!(coord.package_id(), Some("pkg-1"));
    }

    #[tokio::test]
    async fn package_create_failure_skips_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write_file(&dir, "a.bin", b"one"),
            write_file(&dir, "b.bin", b"two"),
        ];
        let service = Arc::new(MockService {
            fail_create: true,
            ..Default::default()
        });
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        let report = coord.upload_package("Dailies", "", &[], &files).await;

        assert_eq!(report.outcome(), PackageOutcome::Failed);
        assert!(report.package_id.is_none());
        assert!(matches!(
            report.error,
            Some(UploadError::PackageCreate { attempts: 1, .. })
        ));
        assert!(report
            .files
            .iter()
            .all(|f| matches!(f.outcome, FileOutcome::Skipped)));
        assert_eq!(coord.state(), CoordinatorState::Aborted);
    }

    #[tokio::test]
    async fn upload_package_requires_files() {
        let service = Arc::new(MockService::default());
        let uploader = Arc::new(MockUploader::default());
        let mut coord = coordinator(test_config(4), &service, &uploader);

        let report = coord.upload_package("Dailies", "", &[], &[]).await;

        assert!(matches!(report.error, Some(UploadError::Config(_))));
        assert_eq!(service.count("create_package"), 0);
    }
}
