use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::TransferError;
use crate::plan::{part_range, plan};

/// Immutable sizing plan for one file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferDescriptor {
    local_path: PathBuf,
    size_bytes: u64,
    part_size_bytes: u64,
    part_count: u32,
}

impl FileTransferDescriptor {
    /// Plans a file of `size_bytes` split into `part_size_bytes` parts.
    pub fn new(
        local_path: impl Into<PathBuf>,
        size_bytes: u64,
        part_size_bytes: u64,
    ) -> Result<Self, TransferError> {
        let count = plan(size_bytes, part_size_bytes)?;
        let part_count = u32::try_from(count).map_err(|_| {
            TransferError::InvalidSize(format!(
                "{count} parts do not fit 32-bit part numbers; raise the part size"
            ))
        })?;
        Ok(Self {
            local_path: local_path.into(),
            size_bytes,
            part_size_bytes,
            part_count,
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn part_size_bytes(&self) -> u64 {
        self.part_size_bytes
    }

    /// Number of parts; at least 1.
    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// Byte length of the 1-based part `part_number`.
    pub fn part_len(&self, part_number: u32) -> u64 {
        let index = u64::from(part_number.saturating_sub(1));
        let r = part_range(self.size_bytes, self.part_size_bytes, index);
        r.end - r.start
    }
}

/// A local file split into the directory/name pair the service registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub path: PathBuf,
    pub dir_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub modified: SystemTime,
}
