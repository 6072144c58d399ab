//! Data source abstraction: uniform read-by-window access to response
//! bytes, regardless of where they come from.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use thiserror::Error;

use crate::fileclass::{FileClass, FileClassSettings};
use crate::sink::fileinfo::{FileInfo, Header};

/// Errors raised while reading from a data source.
#[derive(Debug, Error)]
pub enum ReadError {
    /// A non-sequential read was issued against a sequential-only source.
    #[error("source is not seekable")]
    Unseekable,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Single-use, per-request byte source with response metadata.
///
/// One instance exists per request; the cursor state (where present) is
/// private to that request. Dropping the source releases any per-request
/// handles.
pub trait DataSource: Send {
    /// Response metadata. Always finalized (max-age resolved) by the time
    /// the transport sees it.
    fn stat(&self) -> &FileInfo;

    /// Total size in bytes, `None` when unknown (sequential sources must
    /// report a size).
    fn size(&self) -> Option<u64>;

    /// Read up to `buf.len()` bytes at the given offset. Returns the
    /// number of bytes read; zero means end of content.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ReadError>;

    /// Extra response headers.
    fn headers(&self) -> &[Header] {
        &[]
    }

    /// Identifier for logging.
    fn name(&self) -> &str;
}

/// A finished response: a boxed source the transport drains.
pub type Response = Box<dyn DataSource>;

/// Fully materialized in-memory content (descriptors, expanded
/// templates, generated configuration).
pub struct MemorySource {
    data: Bytes,
    info: FileInfo,
    name: String,
}

impl MemorySource {
    pub fn new(data: Bytes, info: FileInfo, name: impl Into<String>) -> Self {
        Self {
            data,
            info,
            name: name.into(),
        }
    }
}

impl DataSource for MemorySource {
    fn stat(&self) -> &FileInfo {
        &self.info
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ReadError> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Whole-file source backed by an open file handle.
pub struct FileSource {
    file: File,
    size: u64,
    info: FileInfo,
    name: String,
}

impl FileSource {
    /// Open a file and capture its size and modification time.
    pub fn open(path: &Path, content_type: impl Into<String>) -> io::Result<Self> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;

        let mut info = FileInfo::new(content_type);
        if let Ok(modified) = metadata.modified() {
            info = info.with_last_modified(modified);
        }

        Ok(Self {
            file,
            size: metadata.len(),
            info,
            name: path.display().to_string(),
        })
    }

    pub(crate) fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.info.content_type = content_type.into();
    }

    pub(crate) fn finalize(&mut self, class: FileClass, settings: Option<&FileClassSettings>) {
        let info = std::mem::take(&mut self.info);
        self.info = info.with_file_class(class).finalize(settings);
    }
}

impl DataSource for FileSource {
    fn stat(&self) -> &FileInfo {
        &self.info
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ReadError> {
        if offset >= self.size {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let n = self.file.read(buf)?;
        Ok(n)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
