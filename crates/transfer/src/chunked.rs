use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::TransferError;
use crate::plan::part_range;

// ---------------------------------------------------------------------------
// Positioned reads
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    // `seek_read` moves the handle's cursor, but nothing here relies on it.
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// Fills `buf` from `offset`, stopping early only at EOF.
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads fixed-size parts of a file by index.
///
/// Cloning is cheap and clones share one read-only handle; every read is
/// positioned, so clones can be used from concurrent blocking tasks.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    file: Arc<File>,
    path: PathBuf,
    part_size: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` read-only for part reads of `part_size` bytes.
    pub fn open(path: &Path, part_size: u64) -> Result<Self, TransferError> {
        if part_size == 0 {
            return Err(TransferError::InvalidSize(
                "part size must be greater than zero".into(),
            ));
        }
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            part_size,
            file_size,
        })
    }

    /// Reads the 0-based part `part_index`.
    ///
    /// Returns exactly the bytes read, which is shorter than the part size
    /// for the final part and empty for an empty file.
    pub fn read_part(&self, part_index: u64) -> Result<Vec<u8>, TransferError> {
        let range = part_range(self.file_size, self.part_size, part_index);
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        let n = read_full_at(&self.file, &mut buf, range.start).map_err(|source| {
            TransferError::IoRead {
                path: self.path.clone(),
                part_index,
                source,
            }
        })?;
        buf.truncate(n);
        tracing::trace!(path = %self.path.display(), part_index, bytes = n, "read part");
        Ok(buf)
    }

    /// Size of the file when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Configured part size in bytes.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Path the reader was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One-shot read of part `part_index` of the file at `path`.
pub fn read_part(path: &Path, part_index: u64, part_size: u64) -> Result<Vec<u8>, TransferError> {
    ChunkReader::open(path, part_size)?.read_part(part_index)
}
