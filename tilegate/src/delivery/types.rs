//! Shared delivery types: resource accounting, open requests, errors.

use std::fmt;
use std::io;
use std::ops::{AddAssign, SubAssign};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// MIME hint for zip-based archive datasets.
pub const MIME_ZIP: &str = "application/zip";
/// MIME hint for directory datasets.
pub const MIME_DIRECTORY: &str = "inode/directory";

/// Resource cost of an open dataset: open file handles plus a rough
/// memory estimate. The ordering (fewest files first, then least
/// memory) is the eviction ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Resources {
    pub open_files: u64,
    pub memory: u64,
}

impl Resources {
    pub fn new(open_files: u64, memory: u64) -> Self {
        Self { open_files, memory }
    }

    /// True once either component has reached the given limit.
    pub fn exceeds(&self, limit: &Resources) -> bool {
        self.open_files >= limit.open_files || self.memory >= limit.memory
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, other: Self) {
        self.open_files += other.open_files;
        self.memory += other.memory;
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, other: Self) {
        self.open_files = self.open_files.saturating_sub(other.open_files);
        self.memory = self.memory.saturating_sub(other.memory);
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "files={} memory={}", self.open_files, self.memory)
    }
}

/// What a format opener gets to look at: the dataset path plus a cheap
/// MIME/type hint probed from the filesystem.
#[derive(Debug, Clone)]
pub struct OpenInfo {
    pub path: PathBuf,
    pub mime: String,
}

impl OpenInfo {
    /// Probe the path and derive the MIME hint: directories, zip-shaped
    /// archives, everything else.
    ///
    /// Cache keys for archive datasets carry a trailing separator; the
    /// filesystem path must not.
    pub fn probe(path: impl Into<PathBuf>) -> Self {
        let path = trim_trailing_separator(path.into());
        let mime = if path.is_dir() {
            MIME_DIRECTORY
        } else if has_archive_extension(&path) {
            MIME_ZIP
        } else {
            crate::sink::OCTET_STREAM
        };
        Self {
            path,
            mime: mime.to_string(),
        }
    }
}

fn trim_trailing_separator(path: PathBuf) -> PathBuf {
    match path.into_os_string().into_string() {
        Ok(mut s) => {
            while s.len() > 1 && s.ends_with('/') {
                s.pop();
            }
            PathBuf::from(s)
        }
        Err(os) => PathBuf::from(os),
    }
}

fn has_archive_extension(path: &Path) -> bool {
    let name = match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => name.to_ascii_lowercase(),
        None => return false,
    };
    name.ends_with(".slpk") || name.ends_with(".spk") || name.ends_with(".zip")
}

/// Options forwarded to the format openers.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Set when an already-cached dataset is reopened in place after an
    /// external change.
    pub forced_reopen: bool,
}

impl OpenOptions {
    pub fn forced() -> Self {
        Self {
            forced_reopen: true,
        }
    }
}

/// Errors from opening a dataset. Cloneable so one failed open can be
/// reported to every coalesced waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpenError {
    /// No format opener accepted the path.
    #[error("no dataset found at {0}")]
    DatasetNotFound(String),

    /// The path was recognized but its content is malformed.
    #[error("dataset format error: {0}")]
    Format(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<io::Error> for OpenError {
    fn from(err: io::Error) -> Self {
        OpenError::Io(err.to_string())
    }
}

/// Errors from handling a request against an open dataset.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Source(#[from] crate::sink::ReadError),
}

impl DeliveryError {
    /// Map a file-open failure to a request-local not-found where
    /// appropriate.
    pub(crate) fn from_open(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            DeliveryError::NotFound(what.to_string())
        } else {
            DeliveryError::Io(err)
        }
    }
}
