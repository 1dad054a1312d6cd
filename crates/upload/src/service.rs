//! Delivery-service and part-destination traits.
//!
//! The client crate implements these over HTTP. Keeping them as traits
//! keeps the coordinator decoupled from transport and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use packdrop_protocol::messages::{FinalizeFileRequest, RegisterFileRequest};
use packdrop_protocol::types::{Blueprint, PartDestination, PartLimits, PartResult};

use crate::error::ServiceError;

/// Boxed future returned by service calls.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Identifier and access token of an open package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHandle {
    pub package_id: String,
    pub package_token: String,
}

/// What the service hands back when a file is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRegistration {
    pub file_id: String,
    pub blueprint: Blueprint,
    pub limits: PartLimits,
}

/// Package registration, upload initiation, URL issuance and finalize calls.
pub trait DeliveryService: Send + Sync {
    /// Creates an empty package addressed to `recipients`.
    fn create_package<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
        recipients: &'a [String],
    ) -> ServiceFuture<'a, PackageHandle>;

    /// Registers one file with the package.
    fn register_file<'a>(
        &'a self,
        package: &'a PackageHandle,
        file: &'a RegisterFileRequest,
    ) -> ServiceFuture<'a, FileRegistration>;

    /// Calls the blueprint's initiation endpoint and returns the upload id.
    fn initiate_upload<'a>(&'a self, blueprint: &'a Blueprint) -> ServiceFuture<'a, String>;

    /// Requests `part_count` destinations, ordered by part number.
    fn fetch_part_destinations<'a>(
        &'a self,
        package: &'a PackageHandle,
        file_id: &'a str,
        upload_id: &'a str,
        part_count: u32,
    ) -> ServiceFuture<'a, Vec<PartDestination>>;

    /// Commits a file's parts.
    fn finalize_file<'a>(
        &'a self,
        package: &'a PackageHandle,
        file_id: &'a str,
        request: &'a FinalizeFileRequest,
    ) -> ServiceFuture<'a, ()>;

    /// Commits the package once every file is finalized.
    fn finalize_package<'a>(&'a self, package: &'a PackageHandle) -> ServiceFuture<'a, ()>;
}

/// Failed transfer of a single part.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("part {part_number}: {cause}")]
pub struct PartTransferError {
    pub part_number: u32,
    #[source]
    pub cause: ServiceError,
}

/// Sends one part's bytes to its destination.
///
/// Implementations perform exactly one transfer per call; retries belong
/// to the caller.
pub trait PartUploader: Send + Sync {
    fn upload<'a>(
        &'a self,
        destination: &'a PartDestination,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PartResult, PartTransferError>> + Send + 'a>>;
}
