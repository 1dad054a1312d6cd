//! Part planning and positioned chunk reads for multipart uploads.
//!
//! A file is split into fixed-size parts (the last one may be short) that
//! are read independently by index, so any number of workers can pull
//! parts from one open handle without sharing a seek cursor.

mod chunked;
mod plan;
mod progress;
mod types;
mod validation;

use std::path::PathBuf;

pub use chunked::{ChunkReader, read_part};
pub use plan::{check_limits, part_range, plan};
pub use progress::SpeedCalculator;
pub use types::{FileTransferDescriptor, UploadSource};
pub use validation::resolve_upload_source;

pub use packdrop_protocol::constants::DEFAULT_PART_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read failed for {} part {part_index}: {source}", path.display())]
    IoRead {
        path: PathBuf,
        part_index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("part plan exceeds service limits: {0}")]
    LimitExceeded(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
