//! Chunked multipart upload orchestration.
//!
//! A package is created once, then each file is registered, split into
//! fixed-size parts, uploaded with bounded concurrency to externally issued
//! destinations, and committed with its sorted part list. The package is
//! committed last.
//!
//! The remote API is reached through the [`DeliveryService`] and
//! [`PartUploader`] traits; `packdrop-client` provides the HTTP
//! implementations.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod session;
pub mod types;

pub use config::{Credentials, DEFAULT_MAX_CONCURRENCY, SessionConfig};
pub use coordinator::UploadCoordinator;
pub use error::{ServiceError, UploadError};
pub use orchestrator::{PackageOrchestrator, PackageRequest};
pub use retry::RetryPolicy;
pub use service::{
    DeliveryService, FileRegistration, PackageHandle, PartTransferError, PartUploader,
    ServiceFuture,
};
pub use session::TransferSession;
pub use types::{
    CoordinatorState, FileFailure, FileOutcome, FileReport, FinalizeOutcome, FinalizedFile,
    PackageOutcome, PackageReport, UploadEvent,
};
