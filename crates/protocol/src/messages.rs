use serde::{Deserialize, Serialize};

use crate::types::{Blueprint, PartLimits, PartResult};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Exchanges account credentials for a user token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub email: String,
    pub password: String,
}

/// User token issued by [`AuthRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expiry: String,
}

/// Creates a team API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRequest {
    pub name: String,
    /// RFC 3339 expiry timestamp.
    pub expiry: String,
    pub state: String,
}

/// Team API key record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub state: String,
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

/// Creates an empty team package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePackageRequest {
    pub name: String,
    pub description: String,
    pub recipients: Vec<String>,
}

/// Package record returned by [`CreatePackageRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePackageResponse {
    pub id: String,
    pub access_token: String,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Registers a file entry with a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFileRequest {
    pub kind: String,
    pub name: String,
    pub path: String,
    /// RFC 3339 modification time of the local file.
    pub last_modified: String,
}

/// File record embedded in [`RegisterFileResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
}

/// Upload blueprint and sizing limits for a registered file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFileResponse {
    pub create_blueprint: Blueprint,
    pub file: FileRecord,
    #[serde(default)]
    pub max_chunks_count: u64,
    #[serde(default)]
    pub min_chunk_size: u64,
    #[serde(default)]
    pub max_chunk_size: u64,
}

impl RegisterFileResponse {
    /// Sizing limits stated by the service.
    pub fn limits(&self) -> PartLimits {
        PartLimits {
            max_part_count: self.max_chunks_count,
            min_part_size: self.min_chunk_size,
            max_part_size: self.max_chunk_size,
        }
    }
}

/// Requests destination URLs for an initiated upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadUrlsRequest {
    pub upload_id: String,
}

/// One destination entry as returned by the URL-issuance endpoint.
///
/// Older responses only embed the part number in the URL's query string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadUrlEntry {
    pub url: String,
    #[serde(
        default,
        rename = "partNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub part_number: Option<u32>,
}

/// One committed part in a finalize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkExtra {
    #[serde(rename = "partNumber")]
    pub part_number: u32,
    pub etag: String,
}

impl From<&PartResult> for ChunkExtra {
    fn from(result: &PartResult) -> Self {
        Self {
            part_number: result.part_number,
            etag: result.integrity_token.clone(),
        }
    }
}

/// Upload-scoped extras of a finalize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileExtras {
    pub upload_id: String,
}

/// Commits a file's uploaded parts.
///
/// `chunk_extras` must be sorted ascending by part number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeFileRequest {
    pub chunk_extras: Vec<ChunkExtra>,
    pub file_extras: FileExtras,
    pub size: u64,
    pub chunk_size: u64,
}
