use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Remote-issued descriptor of how to initiate a multipart upload for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Pre-signed destination for one part of a file.
///
/// `part_number` is 1-based and authoritative: the issuer owns the numbering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartDestination {
    pub part_number: u32,
    pub url: String,
}

impl PartDestination {
    /// 0-based index of the byte range this destination receives.
    pub fn part_index(&self) -> u64 {
        u64::from(self.part_number.saturating_sub(1))
    }
}

/// Outcome of one successful part upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    pub part_number: u32,
    /// Content-integrity token (ETag) assigned by the storage backend.
    pub integrity_token: String,
}

/// Part sizing limits returned by file registration.
///
/// A zero field means the service did not state that limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLimits {
    pub max_part_count: u64,
    pub min_part_size: u64,
    pub max_part_size: u64,
}
