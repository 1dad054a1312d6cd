//! Upload error types.

use std::path::PathBuf;

use crate::types::CoordinatorState;

/// Failure reported by a delivery-service collaborator or part destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response carried no integrity token")]
    MissingIntegrityToken,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("contract violation: {0}")]
    Contract(String),
}

impl ServiceError {
    /// Whether repeating the same call may succeed.
    ///
    /// Client errors other than 408/429 and malformed responses are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport(_)
            | ServiceError::Timeout
            | ServiceError::MissingIntegrityToken => true,
            ServiceError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ServiceError::InvalidResponse(_) | ServiceError::Contract(_) => false,
        }
    }
}

/// Errors produced while orchestrating an upload.
///
/// Every file-scoped variant carries the local path; part-scoped variants
/// also carry the part number.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Local(#[from] packdrop_transfer::TransferError),

    #[error("package create failed after {attempts} attempt(s): {source}")]
    PackageCreate {
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("file register failed for {} after {attempts} attempt(s): {source}", path.display())]
    FileRegister {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("upload init failed for {} after {attempts} attempt(s): {source}", path.display())]
    UploadInit {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("destination fetch failed for {} after {attempts} attempt(s): {source}", path.display())]
    DestinationFetch {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("destination mismatch for {}: {detail}", path.display())]
    DestinationMismatch { path: PathBuf, detail: String },

    #[error("part {part_number} of {} failed after {attempts} attempt(s): {source}", path.display())]
    Transfer {
        path: PathBuf,
        part_number: u32,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("duplicate result for part {part_number} of {}", path.display())]
    DuplicatePart { path: PathBuf, part_number: u32 },

    #[error(
        "incomplete parts for {}: missing {missing:?}, unexpected {unexpected:?}",
        path.display()
    )]
    IncompleteParts {
        path: PathBuf,
        missing: Vec<u32>,
        unexpected: Vec<u32>,
    },

    #[error("file finalize failed for {} after {attempts} attempt(s): {source}", path.display())]
    FileFinalize {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("package finalize failed for {package_id} after {attempts} attempt(s): {source}")]
    PackageFinalize {
        package_id: String,
        attempts: u32,
        #[source]
        source: ServiceError,
    },

    #[error("package has {} unfinished file(s): {paths:?}", paths.len())]
    UnfinishedFiles { paths: Vec<PathBuf> },

    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: CoordinatorState,
    },

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Whether the failure is confined to one file, so the remaining files
    /// of the package can still be processed.
    pub fn is_file_scoped(&self) -> bool {
        matches!(
            self,
            UploadError::Local(_)
                | UploadError::FileRegister { .. }
                | UploadError::UploadInit { .. }
                | UploadError::DestinationFetch { .. }
                | UploadError::DestinationMismatch { .. }
                | UploadError::Transfer { .. }
                | UploadError::DuplicatePart { .. }
                | UploadError::IncompleteParts { .. }
                | UploadError::FileFinalize { .. }
        )
    }
}
