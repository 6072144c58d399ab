//! Per-request response construction.
//!
//! Drivers do not talk to the transport directly; they hand content to a
//! [`Sink`], which wraps it in the matching [`DataSource`] variant and
//! resolves the cache policy from the serving location's file-class
//! settings. That resolution happens here and nowhere else, exactly once
//! per response.

mod archive;
mod detect;
mod fileinfo;
mod source;
mod window;

pub use archive::ArchiveEntrySource;
pub use detect::{content_type_for_extension, content_type_from_magic, GZIP_MAGIC};
pub use fileinfo::{FileInfo, Header, OCTET_STREAM};
pub use source::{DataSource, FileSource, MemorySource, ReadError, Response};
pub use window::WindowSource;

use bytes::Bytes;

use crate::config::LocationConfig;
use crate::fileclass::{FileClass, FileClassSettings};
use crate::support::{SupportFile, Variables};

/// Response factory bound to one serving location.
pub struct Sink<'a> {
    settings: Option<&'a FileClassSettings>,
    vars: &'a Variables,
}

impl<'a> Sink<'a> {
    pub fn new(config: &'a LocationConfig) -> Self {
        Self {
            settings: Some(&config.file_class_settings),
            vars: &config.vars,
        }
    }

    /// Sink without file-class settings in scope: every response without
    /// an explicit max-age comes out uncacheable.
    pub fn detached(vars: &'a Variables) -> Self {
        Self {
            settings: None,
            vars,
        }
    }

    /// In-memory content with caller-supplied metadata.
    pub fn content(&self, data: Bytes, info: FileInfo, name: &str) -> Response {
        let info = info.finalize(self.settings);
        Box::new(MemorySource::new(data, info, name))
    }

    /// Whole-file content.
    pub fn file_stream(&self, mut source: FileSource, class: FileClass) -> Response {
        source.finalize(class, self.settings);
        Box::new(source)
    }

    /// A byte window out of a file, e.g. an archive-internal range.
    pub fn file_window(
        &self,
        mut source: FileSource,
        class: FileClass,
        offset: u64,
        length: u64,
        gzipped: bool,
    ) -> Response {
        source.finalize(class, self.settings);
        Box::new(WindowSource::new(Box::new(source), offset, length, gzipped))
    }

    /// An archive entry stream.
    pub fn archive_stream(
        &self,
        mut source: ArchiveEntrySource,
        content_type: &str,
        class: FileClass,
        gzipped: bool,
    ) -> Response {
        source.set_content_type(content_type);
        if gzipped {
            source.mark_gzipped();
        }
        source.finalize(class, self.settings);
        Box::new(source)
    }

    /// An embedded support file, expanding templates with the location's
    /// variables. Expanded content counts as modified now, so no
    /// last-modified stamp is attached.
    pub fn support(&self, file: &SupportFile) -> Response {
        let info = FileInfo::new(file.content_type).with_file_class(FileClass::Support);

        if !file.is_template {
            return self.content(Bytes::from_static(file.data), info, file.path);
        }

        let text = String::from_utf8_lossy(file.data);
        let expanded = self.vars.expand(&text);
        self.content(Bytes::from(expanded), info, file.path)
    }
}
