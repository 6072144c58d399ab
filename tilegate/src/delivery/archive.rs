//! Archive dataset driver for `.slpk`/`.spk` scene packages.
//!
//! The archive is a zip container. The central directory is indexed
//! once at open; stored entries are then served directly as byte
//! windows of the archive file (payloads that are themselves gzip
//! streams go out marked `Content-Encoding: gzip`), while deflated
//! entries go through a sequential decompressing reader.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use flate2::read::DeflateDecoder;
use zip::{CompressionMethod, ZipArchive};

use crate::config::LocationConfig;
use crate::delivery::driver::{file_fingerprint, fingerprint_changed, Driver, SharedDriver};
use crate::delivery::types::{
    DeliveryError, OpenError, OpenInfo, OpenOptions, Resources, MIME_ZIP,
};
use crate::fileclass::FileClass;
use crate::sink::{
    content_type_for_extension, content_type_from_magic, ArchiveEntrySource, DataSource,
    FileSource, Response, Sink, GZIP_MAGIC, OCTET_STREAM,
};
use crate::support;

#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    data_start: u64,
    compressed_size: u64,
    size: u64,
    method: CompressionMethod,
}

/// Open archive dataset.
pub struct ArchiveDriver {
    path: PathBuf,
    entries: HashMap<String, EntryMeta>,
    fingerprint: SystemTime,
    timestamp: SystemTime,
}

impl ArchiveDriver {
    pub(crate) fn open(
        info: &OpenInfo,
        _options: &OpenOptions,
    ) -> Result<Option<SharedDriver>, OpenError> {
        if info.mime != MIME_ZIP {
            return Ok(None);
        }

        // a missing archive is "no dataset here", not a fatal error
        let file = match File::open(&info.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(map_zip_error)?;

        let mut entries = HashMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(map_zip_error)?;
            if entry.is_dir() {
                continue;
            }
            entries.insert(
                entry.name().to_string(),
                EntryMeta {
                    data_start: entry.data_start().expect("zip raw entry data_start"),
                    compressed_size: entry.compressed_size(),
                    size: entry.size(),
                    method: entry.compression(),
                },
            );
        }

        let fingerprint = file_fingerprint(&info.path)?;

        Ok(Some(Arc::new(Self {
            path: info.path.clone(),
            entries,
            fingerprint,
            timestamp: fingerprint,
        })))
    }

    fn serve_stored(
        &self,
        sink: &Sink<'_>,
        key: &str,
        meta: &EntryMeta,
        declared: Option<&'static str>,
    ) -> Result<Response, DeliveryError> {
        let mut source = FileSource::open(&self.path, OCTET_STREAM)
            .map_err(|err| DeliveryError::from_open(err, key))?;

        let mut gzipped = false;
        match declared {
            None => {
                // best-effort sniff from magic bytes, octet-stream otherwise
                let mut head = [0u8; 8];
                let n = source.read_at(&mut head, meta.data_start)?;
                if let Some(detected) = content_type_from_magic(&head[..n]) {
                    source.set_content_type(detected);
                }
            }
            Some(content_type) => {
                source.set_content_type(content_type);
                let mut head = [0u8; 1];
                let n = source.read_at(&mut head, meta.data_start)?;
                if n == 1 && head[0] == GZIP_MAGIC {
                    gzipped = true;
                }
            }
        }

        Ok(sink.file_window(
            source,
            FileClass::Data,
            meta.data_start,
            meta.compressed_size,
            gzipped,
        ))
    }

    fn serve_deflated(
        &self,
        sink: &Sink<'_>,
        key: &str,
        meta: &EntryMeta,
        declared: Option<&'static str>,
    ) -> Result<Response, DeliveryError> {
        let mut file =
            File::open(&self.path).map_err(|err| DeliveryError::from_open(err, key))?;
        file.seek(SeekFrom::Start(meta.data_start))?;
        let decoder = DeflateDecoder::new(file.take(meta.compressed_size));

        let mut source = ArchiveEntrySource::sequential(decoder, Some(meta.size), key);
        source.set_last_modified(self.timestamp);

        let mut gzipped = false;
        if declared.is_some() && source.peek_first_byte()? == Some(GZIP_MAGIC) {
            gzipped = true;
        }

        Ok(sink.archive_stream(
            source,
            declared.unwrap_or(OCTET_STREAM),
            FileClass::Data,
            gzipped,
        ))
    }
}

impl Driver for ArchiveDriver {
    fn resources(&self) -> Resources {
        Resources::new(1, 0)
    }

    fn externally_changed(&self) -> io::Result<bool> {
        fingerprint_changed(&self.path, self.fingerprint)
    }

    fn handle(
        &self,
        sink: &Sink<'_>,
        path: &str,
        config: &LocationConfig,
    ) -> Result<Response, DeliveryError> {
        let key = path.trim_start_matches('/');

        if key.is_empty() || key == "." {
            if config.enable_browser {
                if let Some(file) = support::find("") {
                    return Ok(sink.support(file));
                }
            }
            return Err(DeliveryError::NotFound("no archive index".to_string()));
        }

        let Some(meta) = self.entries.get(key) else {
            return Err(DeliveryError::NotFound(key.to_string()));
        };

        // gzip-suffixed entries keep the content type of their payload
        let logical = key.strip_suffix(".gz").unwrap_or(key);
        let declared = content_type_for_extension(logical);

        match meta.method {
            CompressionMethod::Stored => self.serve_stored(sink, key, meta, declared),
            CompressionMethod::Deflated => self.serve_deflated(sink, key, meta, declared),
            other => Err(DeliveryError::Io(io::Error::other(format!(
                "unsupported compression method {other:?} in entry {key}"
            )))),
        }
    }
}

fn map_zip_error(err: zip::result::ZipError) -> OpenError {
    match err {
        zip::result::ZipError::Io(err) => OpenError::Io(err.to_string()),
        other => OpenError::Format(other.to_string()),
    }
}
