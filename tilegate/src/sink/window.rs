//! Windowed view over another data source.

use crate::sink::fileinfo::{FileInfo, Header};
use crate::sink::source::{DataSource, ReadError, Response};

/// Fixed `[offset, offset + length)` window over an inner source.
///
/// The window is clamped to the inner source's actual size at
/// construction; reads outside it return zero bytes and the reported
/// size is the window length. Used for partial content (byte-range
/// requests) and for serving archive-internal byte ranges, optionally
/// marking the payload as gzip-encoded independently of the inner
/// source.
pub struct WindowSource {
    inner: Response,
    offset: u64,
    end: u64,
    headers: Vec<Header>,
}

impl WindowSource {
    pub fn new(inner: Response, offset: u64, length: u64, gzipped: bool) -> Self {
        let mut offset = offset;
        let mut end = offset.saturating_add(length);

        // sanity check against the inner size
        if let Some(inner_size) = inner.size() {
            if end > inner_size {
                end = inner_size;
            }
            if offset > inner_size {
                offset = inner_size;
            }
        }

        let mut headers: Vec<Header> = inner.headers().to_vec();
        if gzipped {
            headers.push(Header::gzip());
        }

        Self {
            inner,
            offset,
            end,
            headers,
        }
    }
}

impl DataSource for WindowSource {
    fn stat(&self) -> &FileInfo {
        self.inner.stat()
    }

    fn size(&self) -> Option<u64> {
        Some(self.end - self.offset)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ReadError> {
        let absolute = offset.saturating_add(self.offset);
        if absolute >= self.end {
            return Ok(0);
        }
        let left = (self.end - absolute) as usize;
        let want = buf.len().min(left);
        self.inner.read_at(&mut buf[..want], absolute)
    }

    fn headers(&self) -> &[Header] {
        &self.headers
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
