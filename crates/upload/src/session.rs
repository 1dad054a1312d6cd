//! Identifiers and tokens addressing the remote package and current file.

use std::collections::HashSet;

use crate::service::PackageHandle;

/// Package-scoped transfer state, owned by the coordinator.
///
/// Workers never see this value; they get an immutable destination and
/// byte snapshot instead.
#[derive(Debug, Clone)]
pub struct TransferSession {
    package: PackageHandle,
    current_file_id: Option<String>,
    current_upload_id: Option<String>,
    finalized_files: HashSet<String>,
}

impl TransferSession {
    pub fn new(package: PackageHandle) -> Self {
        Self {
            package,
            current_file_id: None,
            current_upload_id: None,
            finalized_files: HashSet::new(),
        }
    }

    /// Package id and the read-only access token reused by every file.
    pub fn package(&self) -> &PackageHandle {
        &self.package
    }

    pub fn package_id(&self) -> &str {
        &self.package.package_id
    }

    /// Switches the session to a newly registered file.
    pub fn begin_file(&mut self, file_id: String, upload_id: String) {
        self.current_file_id = Some(file_id);
        self.current_upload_id = Some(upload_id);
    }

    pub fn current_file_id(&self) -> Option<&str> {
        self.current_file_id.as_deref()
    }

    pub fn current_upload_id(&self) -> Option<&str> {
        self.current_upload_id.as_deref()
    }

    /// Records a successful file finalize. Returns `false` if the file was
    /// already recorded.
    pub fn mark_finalized(&mut self, file_id: &str) -> bool {
        self.finalized_files.insert(file_id.to_string())
    }

    pub fn is_finalized(&self, file_id: &str) -> bool {
        self.finalized_files.contains(file_id)
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized_files.len()
    }
}
