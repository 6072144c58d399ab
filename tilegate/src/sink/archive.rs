//! Data source over archive-internal entry streams.

use std::io::{Read, Seek, SeekFrom};

use crate::fileclass::{FileClass, FileClassSettings};
use crate::sink::fileinfo::{FileInfo, Header};
use crate::sink::source::{DataSource, ReadError};

trait SeekableRead: Read + Seek + Send {}
impl<T: Read + Seek + Send> SeekableRead for T {}

enum EntryReader {
    Seekable(Box<dyn SeekableRead>),
    Sequential(Box<dyn Read + Send>),
}

/// Source over an archive entry whose underlying stream may or may not
/// be seekable.
///
/// A cursor tracks the current position and a seek is only issued when a
/// read targets a different offset. Non-sequential reads against a
/// sequential-only stream fail with [`ReadError::Unseekable`]. Reads are
/// clamped to the entry's declared size.
pub struct ArchiveEntrySource {
    reader: EntryReader,
    size: Option<u64>,
    info: FileInfo,
    headers: Vec<Header>,
    name: String,
    /// Logical cursor within the entry.
    offset: u64,
    /// Byte fetched by a first-byte peek but not yet consumed by a read.
    lookahead: Option<u8>,
}

impl ArchiveEntrySource {
    /// Source over a seekable entry stream positioned at the entry start.
    pub fn seekable(
        reader: impl Read + Seek + Send + 'static,
        size: Option<u64>,
        name: impl Into<String>,
    ) -> Self {
        Self::with_reader(EntryReader::Seekable(Box::new(reader)), size, name)
    }

    /// Source over a sequential-only entry stream (e.g. a decompressor).
    pub fn sequential(
        reader: impl Read + Send + 'static,
        size: Option<u64>,
        name: impl Into<String>,
    ) -> Self {
        Self::with_reader(EntryReader::Sequential(Box::new(reader)), size, name)
    }

    fn with_reader(reader: EntryReader, size: Option<u64>, name: impl Into<String>) -> Self {
        Self {
            reader,
            size,
            info: FileInfo::default(),
            headers: Vec::new(),
            name: name.into(),
            offset: 0,
            lookahead: None,
        }
    }

    /// Look at the first byte of the entry without consuming it: a
    /// subsequent read from offset zero still returns the same byte.
    ///
    /// Returns `None` for an empty entry. Only meaningful before any
    /// read has advanced the cursor.
    pub fn peek_first_byte(&mut self) -> Result<Option<u8>, ReadError> {
        if self.offset != 0 {
            return Ok(None);
        }
        if let Some(byte) = self.lookahead {
            return Ok(Some(byte));
        }

        let mut byte = [0u8; 1];
        match &mut self.reader {
            EntryReader::Seekable(reader) => {
                if reader.read(&mut byte)? == 0 {
                    return Ok(None);
                }
                // restore the position for the next read
                reader.seek(SeekFrom::Start(0))?;
                Ok(Some(byte[0]))
            }
            EntryReader::Sequential(reader) => {
                if reader.read(&mut byte)? == 0 {
                    return Ok(None);
                }
                self.lookahead = Some(byte[0]);
                Ok(Some(byte[0]))
            }
        }
    }

    pub(crate) fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.info.content_type = content_type.into();
    }

    pub(crate) fn set_last_modified(&mut self, when: std::time::SystemTime) {
        self.info.last_modified = Some(when);
    }

    pub(crate) fn mark_gzipped(&mut self) {
        self.headers.push(Header::gzip());
    }

    pub(crate) fn finalize(&mut self, class: FileClass, settings: Option<&FileClassSettings>) {
        let info = std::mem::take(&mut self.info);
        self.info = info.with_file_class(class).finalize(settings);
    }
}

impl DataSource for ArchiveEntrySource {
    fn stat(&self) -> &FileInfo {
        &self.info
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ReadError> {
        // clamp to the declared entry size
        let mut want = buf.len();
        if let Some(size) = self.size {
            if offset >= size {
                return Ok(0);
            }
            want = want.min((size - offset) as usize);
        }
        if want == 0 {
            return Ok(0);
        }

        if offset != self.offset {
            match &mut self.reader {
                EntryReader::Seekable(reader) => {
                    reader.seek(SeekFrom::Start(offset))?;
                    self.offset = offset;
                    self.lookahead = None;
                }
                EntryReader::Sequential(_) => return Err(ReadError::Unseekable),
            }
        }

        let mut filled = 0;
        if self.offset == 0 {
            if let Some(byte) = self.lookahead.take() {
                buf[0] = byte;
                filled = 1;
                self.offset = 1;
                if want == 1 {
                    return Ok(1);
                }
            }
        }

        let reader: &mut dyn Read = match &mut self.reader {
            EntryReader::Seekable(reader) => reader,
            EntryReader::Sequential(reader) => reader,
        };
        let n = reader.read(&mut buf[filled..want])?;
        self.offset += n as u64;
        Ok(filled + n)
    }

    fn headers(&self) -> &[Header] {
        &self.headers
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sequential_reads_in_order() {
        let mut source =
            ArchiveEntrySource::sequential(Cursor::new(b"0123456789".to_vec()), Some(10), "entry");

        let mut buf = [0u8; 4];
        assert_eq!(source.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(source.read_at(&mut buf, 4).unwrap(), 4);
        assert_eq!(&buf, b"4567");
    }

    #[test]
    fn test_sequential_rejects_random_access() {
        let mut source =
            ArchiveEntrySource::sequential(Cursor::new(b"0123456789".to_vec()), Some(10), "entry");

        let mut buf = [0u8; 4];
        assert!(matches!(
            source.read_at(&mut buf, 5),
            Err(ReadError::Unseekable)
        ));
    }

    #[test]
    fn test_seekable_random_access() {
        let mut source =
            ArchiveEntrySource::seekable(Cursor::new(b"0123456789".to_vec()), Some(10), "entry");

        let mut buf = [0u8; 3];
        assert_eq!(source.read_at(&mut buf, 7).unwrap(), 3);
        assert_eq!(&buf, b"789");
        assert_eq!(source.read_at(&mut buf, 0).unwrap(), 3);
        assert_eq!(&buf, b"012");
    }

    #[test]
    fn test_clamps_to_declared_size() {
        // underlying stream is longer than the declared entry size
        let mut source =
            ArchiveEntrySource::sequential(Cursor::new(b"0123456789".to_vec()), Some(4), "entry");

        let mut buf = [0u8; 8];
        assert_eq!(source.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf[..4], b"0123");
        assert_eq!(source.read_at(&mut buf, 4).unwrap(), 0);
    }

    #[test]
    fn test_peek_does_not_consume_sequential() {
        let mut source =
            ArchiveEntrySource::sequential(Cursor::new(vec![0x1f, 0x8b, 0x08]), Some(3), "entry");

        assert_eq!(source.peek_first_byte().unwrap(), Some(0x1f));
        // peeking twice is stable
        assert_eq!(source.peek_first_byte().unwrap(), Some(0x1f));

        let mut buf = [0u8; 3];
        assert_eq!(source.read_at(&mut buf, 0).unwrap(), 3);
        assert_eq!(&buf, &[0x1f, 0x8b, 0x08]);
    }

    #[test]
    fn test_peek_does_not_consume_seekable() {
        let mut source =
            ArchiveEntrySource::seekable(Cursor::new(vec![0x1f, 0x8b]), Some(2), "entry");

        assert_eq!(source.peek_first_byte().unwrap(), Some(0x1f));

        let mut buf = [0u8; 2];
        assert_eq!(source.read_at(&mut buf, 0).unwrap(), 2);
        assert_eq!(&buf, &[0x1f, 0x8b]);
    }

    #[test]
    fn test_peek_empty_entry() {
        let mut source =
            ArchiveEntrySource::sequential(Cursor::new(Vec::new()), Some(0), "entry");
        assert_eq!(source.peek_first_byte().unwrap(), None);
    }
}
