//! Parsing of the storage backend's multipart-initiation response.

use serde::Deserialize;

/// Errors from parsing an initiation response.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Malformed(#[from] quick_xml::de::DeError),

    #[error("response has no UploadId")]
    MissingUploadId,
}

/// `InitiateMultipartUploadResult` document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitiateUploadResult {
    #[serde(rename = "Bucket", default)]
    pub bucket: Option<String>,
    #[serde(rename = "Key", default)]
    pub key: Option<String>,
    #[serde(rename = "UploadId", default)]
    pub upload_id: Option<String>,
}

/// Extracts the upload identifier from an initiation response body.
pub fn parse_upload_id(body: &str) -> Result<String, XmlError> {
    let doc: InitiateUploadResult = quick_xml::de::from_str(body)?;
    match doc.upload_id {
        Some(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        _ => Err(XmlError::MissingUploadId),
    }
}
