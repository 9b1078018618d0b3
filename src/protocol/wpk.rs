//! Reads a WPK in fixed-size chunks, one `write` step's worth at a time.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// A single-use, sequential reader over one WPK file. The underlying handle is released on every
/// exit path through `Drop` — success, a `write` failure midway through streaming, or an
/// orchestrator panic unwinding past it.
pub struct WpkStreamer {
    file: File,
    chunk_size: usize,
}

impl WpkStreamer {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(WpkStreamer { file, chunk_size })
    }

    /// Reads up to `chunk_size` bytes. A zero-length result signals end of file.
    pub fn next_chunk(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0;

        while total < self.chunk_size {
            match self.file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }

        buf.truncate(total);
        Ok(buf)
    }
}

/// Resolves the local path a [`WpkStreamer`] should open for a given upgrade task, per §4.4:
/// `<wpk_repository_path>/<wpk_file>` for Standard, `file_path` as-is for Custom.
pub fn local_path(repository_path: &str, wpk_file: &str) -> PathBuf {
    Path::new(repository_path).join(wpk_file)
}
