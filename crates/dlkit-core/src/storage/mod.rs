//! Random-offset file I/O for one task's output (C1 FileAccessor).
//!
//! A download is written into a `.part` sibling of its final name so a
//! crash mid-transfer never leaves a half-written file under the name the
//! caller asked for; `StorageWriter::finalize` is the only thing that
//! renames it into place. Segment workers hold a cloned `StorageWriter` and
//! write into disjoint byte ranges of the same file concurrently.

mod writer;

pub use writer::StorageWriter;

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Suffix applied to the output path while a task is in flight.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> std::path::PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    std::path::PathBuf::from(o)
}

/// Opens (creating/truncating) the temp file and preallocates it, producing
/// a [`StorageWriter`] segment workers can clone and write into concurrently.
/// Call `preallocate` before `build` when the total size is known up front;
/// skip it for a task whose size isn't known until bytes start arriving.
pub struct StorageWriterBuilder {
    file: File,
    temp_path: std::path::PathBuf,
}

impl StorageWriterBuilder {
    pub fn create(temp_path: &Path) -> Result<Self> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
        Ok(StorageWriterBuilder { file, temp_path: temp_path.to_path_buf() })
    }

    /// Reserves `size` bytes of disk space up front. On Unix this tries
    /// `posix_fallocate` for real block allocation before falling back to
    /// `set_len`, since a sparse file backed only by `set_len` can still
    /// fail a later `write_at` with ENOSPC on a nearly-full filesystem.
    pub fn preallocate(&mut self, size: u64) -> Result<()> {
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size).context("failed to preallocate file")?;
        Ok(())
    }

    pub fn build(self) -> StorageWriter {
        StorageWriter::from_file_and_path(self.file, self.temp_path)
    }
}
