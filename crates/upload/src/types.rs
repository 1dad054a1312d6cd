//! Data types for the upload flow.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::UploadError;

/// Coordinator lifecycle.
///
/// `FileAborted` ends one file without closing the package; `Aborted`
/// abandons the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    PackageOpen,
    FileRegistering,
    FileUploading,
    FileFinalizing,
    FileDone,
    FileAborted,
    PackageFinalizing,
    PackageDone,
    Aborted,
}

impl CoordinatorState {
    /// `PackageDone` and `Aborted` accept no further operations.
    pub fn is_terminal(self) -> bool {
        matches!(self, CoordinatorState::PackageDone | CoordinatorState::Aborted)
    }
}

/// Result of a `finalize_file` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The service accepted the part list.
    Finalized,
    /// The file was already finalized in this session; nothing was sent.
    AlreadyFinalized,
}

/// Progress event emitted while a package uploads.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    PackageOpened {
        package_id: String,
    },
    FileStarted {
        path: PathBuf,
        size_bytes: u64,
        part_count: u32,
    },
    /// Best effort: dropped rather than queued when the receiver lags.
    PartUploaded {
        path: PathBuf,
        part_number: u32,
        bytes: u64,
        /// Confirmed bytes of the file so far, this part included.
        uploaded_bytes: u64,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    PartRetry {
        path: PathBuf,
        part_number: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    FileFinalized {
        path: PathBuf,
        file_id: String,
    },
    FileFailed {
        path: PathBuf,
        error: String,
    },
    PackageFinalized {
        package_id: String,
    },
}

/// A file committed to the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFile {
    pub path: PathBuf,
    pub file_id: String,
    pub upload_id: String,
    pub size_bytes: u64,
    pub part_count: u32,
}

/// A file that could not be committed, with enough context for a cold retry.
#[derive(Debug, thiserror::Error)]
#[error("{}: {error}", path.display())]
pub struct FileFailure {
    pub path: PathBuf,
    /// Upload id if the upload was initiated before the failure.
    pub upload_id: Option<String>,
    /// Part numbers that reached the service, ascending.
    pub succeeded_parts: Vec<u32>,
    #[source]
    pub error: UploadError,
}

/// Per-file entry of a [`PackageReport`].
#[derive(Debug)]
pub enum FileOutcome {
    Finalized(FinalizedFile),
    Failed(FileFailure),
    /// Not attempted because the package was abandoned first.
    Skipped,
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

/// Overall result of a package upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageOutcome {
    /// Every file and the package were finalized.
    Complete,
    /// Some files were finalized, but a file or the package finalize failed.
    PartialSuccess,
    /// Nothing was finalized.
    Failed,
}

/// What happened to a package and each of its files.
#[derive(Debug)]
pub struct PackageReport {
    /// Set once the package was created; the package stays addressable on failure.
    pub package_id: Option<String>,
    pub files: Vec<FileReport>,
    pub package_finalized: bool,
    /// Package-level error (create, cancel, package finalize), if any.
    pub error: Option<UploadError>,
}

impl PackageReport {
    pub fn outcome(&self) -> PackageOutcome {
        if self.package_finalized {
            PackageOutcome::Complete
        } else if self.finalized_count() > 0 {
            PackageOutcome::PartialSuccess
        } else {
            PackageOutcome::Failed
        }
    }

    pub fn finalized_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Finalized(_)))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileFailure> {
        self.files.iter().filter_map(|f| match &f.outcome {
            FileOutcome::Failed(failure) => Some(failure),
            _ => None,
        })
    }
}
