//! Part transfer to pre-signed storage URLs.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use packdrop_protocol::constants::PART_CONTENT_TYPE;
use packdrop_protocol::types::{PartDestination, PartResult};
use packdrop_upload::{PartTransferError, PartUploader, ServiceError};
use reqwest::header::{CONTENT_TYPE, ETAG};
use tracing::trace;

use crate::client::Error;

/// Sends each part with a single `PUT`. Retries are left to the caller.
#[derive(Clone)]
pub struct HttpPartUploader {
    http: reqwest::Client,
}

impl HttpPartUploader {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }

    async fn put(&self, destination: &PartDestination, body: Bytes) -> Result<PartResult, ServiceError> {
        let len = body.len();
        let resp = self
            .http
            .put(&destination.url)
            .header(CONTENT_TYPE, PART_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| ServiceError::from(Error::Http(e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ServiceError::MissingIntegrityToken)?;
        trace!(part = destination.part_number, bytes = len, etag, "part stored");

        Ok(PartResult {
            part_number: destination.part_number,
            integrity_token: etag.to_string(),
        })
    }
}

impl PartUploader for HttpPartUploader {
    fn upload<'a>(
        &'a self,
        destination: &'a PartDestination,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<PartResult, PartTransferError>> + Send + 'a>> {
        Box::pin(async move {
            self.put(destination, body)
                .await
                .map_err(|cause| PartTransferError {
                    part_number: destination.part_number,
                    cause,
                })
        })
    }
}
