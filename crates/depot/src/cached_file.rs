use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::warn;

use crate::error::{Error, Result};

type OnClose = Box<dyn FnOnce(&Path) + Send + Sync>;

/// An open handle on downloaded content.
///
/// Holding one keeps the content on disk. The hold is released by
/// [`close`](Self::close) or, failing that, when the handle is dropped.
pub struct CachedFile {
    file:     Option<File>,
    path:     PathBuf,
    on_close: Option<OnClose>,
}

impl CachedFile {
    pub(crate) fn new(file: File, path: PathBuf, on_close: impl FnOnce(&Path) + Send + Sync + 'static) -> Self {
        Self {
            file: Some(file),
            path,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Open a temporary file that is deleted once the handle closes.
    pub(crate) fn remove_on_close(path: TempPath) -> Result<Self> {
        let file = File::open(&path)?;
        let location = path.to_path_buf();
        Ok(Self::new(file, location, move |_| {
            let location = path.to_path_buf();
            if let Err(e) = path.close() {
                warn!(path = ?location, error = %e, "failed to remove uncached file");
            }
        }))
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Release the handle. A second call fails with [`Error::AlreadyClosed`].
    pub fn close(&mut self) -> Result<()> {
        let on_close = self.on_close.take().ok_or(Error::AlreadyClosed)?;
        self.file = None;
        on_close(&self.path);
        Ok(())
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("read on closed cached file"))
    }
}

impl Read for CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.file()?.read(buf) }
}

impl Seek for CachedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { self.file()?.seek(pos) }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            self.file = None;
            on_close(&self.path);
        }
    }
}

impl fmt::Debug for CachedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFile")
            .field("path", &self.path)
            .field("closed", &self.on_close.is_none())
            .finish()
    }
}
