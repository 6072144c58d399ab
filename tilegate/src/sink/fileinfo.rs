//! Response metadata attached to every data source.

use std::time::SystemTime;

use crate::fileclass::{FileClass, FileClassSettings, NEVER_CACHE};

/// Default content type for unclassified payloads.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// One extra response header (e.g. `Content-Encoding: gzip`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The `Content-Encoding: gzip` header.
    pub fn gzip() -> Self {
        Self::new("Content-Encoding", "gzip")
    }
}

/// Per-response descriptor: content type, modification time, cache policy.
///
/// `max_age` stays `None` until the response is finalized by the sink;
/// after finalization it is always set.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub content_type: String,
    pub last_modified: Option<SystemTime>,
    pub max_age: Option<i64>,
    pub file_class: FileClass,
}

impl Default for FileInfo {
    fn default() -> Self {
        Self::new(OCTET_STREAM)
    }
}

impl FileInfo {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            last_modified: None,
            max_age: None,
            file_class: FileClass::Unknown,
        }
    }

    pub fn with_last_modified(mut self, when: SystemTime) -> Self {
        self.last_modified = Some(when);
        self
    }

    /// Hard max-age override; a value set here survives finalization.
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_file_class(mut self, class: FileClass) -> Self {
        self.file_class = class;
        self
    }

    /// Resolve the cache max-age. Called exactly once, when a response is
    /// about to be handed to the transport.
    ///
    /// An already-set max-age passes through unchanged. Without any
    /// file-class settings in scope the response is marked uncacheable.
    pub fn finalize(mut self, settings: Option<&FileClassSettings>) -> Self {
        if self.max_age.is_some() {
            return self;
        }
        self.max_age = Some(match settings {
            None => NEVER_CACHE,
            Some(settings) => settings.max_age(self.file_class),
        });
        self
    }
}
