//! Directory tileset driver: the primary dataset format.
//!
//! A tileset is a directory carrying a `tileset.json` descriptor; tile
//! and resource files live in plain files beneath it.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Deserialize;

use crate::config::LocationConfig;
use crate::delivery::driver::{
    self, file_fingerprint, fingerprint_changed, Driver, SharedDriver,
};
use crate::delivery::types::{
    DeliveryError, OpenError, OpenInfo, OpenOptions, Resources, MIME_DIRECTORY,
};
use crate::fileclass::FileClass;
use crate::sink::{content_type_for_extension, FileSource, Response, Sink, OCTET_STREAM};
use crate::support;

pub(crate) const DESCRIPTOR: &str = "tileset.json";
const REGISTRY: &str = "registry.json";

fn default_tile_content_type() -> String {
    OCTET_STREAM.to_string()
}

/// The `tileset.json` descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct TilesetDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    /// Content type served for tile files without a recognized extension.
    #[serde(default = "default_tile_content_type")]
    pub tile_content_type: String,
}

/// Open directory tileset.
pub struct TilesetDriver {
    root: PathBuf,
    descriptor: TilesetDescriptor,
    descriptor_size: u64,
    fingerprint: SystemTime,
}

impl TilesetDriver {
    /// Try to open `info.path` as a directory tileset. A directory
    /// without the descriptor is simply not this format.
    pub(crate) fn open(
        info: &OpenInfo,
        _options: &OpenOptions,
    ) -> Result<Option<SharedDriver>, OpenError> {
        if info.mime != MIME_DIRECTORY {
            return Ok(None);
        }

        let descriptor_path = info.path.join(DESCRIPTOR);
        let raw = match std::fs::read(&descriptor_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let descriptor: TilesetDescriptor = serde_json::from_slice(&raw)
            .map_err(|err| OpenError::Format(format!("{}: {err}", descriptor_path.display())))?;
        let fingerprint = file_fingerprint(&descriptor_path)?;

        Ok(Some(Arc::new(Self {
            root: info.path.clone(),
            descriptor,
            descriptor_size: raw.len() as u64,
            fingerprint,
        })))
    }

    fn tile_content_type(&self, path: &str) -> String {
        content_type_for_extension(path)
            .map(str::to_string)
            .unwrap_or_else(|| self.descriptor.tile_content_type.clone())
    }
}

impl Driver for TilesetDriver {
    fn resources(&self) -> Resources {
        Resources::new(1, self.descriptor_size)
    }

    fn externally_changed(&self) -> io::Result<bool> {
        fingerprint_changed(&self.root.join(DESCRIPTOR), self.fingerprint)
    }

    fn handle(
        &self,
        sink: &Sink<'_>,
        path: &str,
        config: &LocationConfig,
    ) -> Result<Response, DeliveryError> {
        let path = path.trim_start_matches('/');

        if path.is_empty() || path == "." {
            if config.enable_browser {
                if let Some(file) = support::find("") {
                    return Ok(sink.support(file));
                }
            }
            return Err(DeliveryError::NotFound("no tileset index".to_string()));
        }

        if path == DESCRIPTOR {
            let source = FileSource::open(&self.root.join(DESCRIPTOR), "application/json")
                .map_err(|err| DeliveryError::from_open(err, path))?;
            return Ok(sink.file_stream(source, FileClass::Config));
        }

        if path == REGISTRY {
            let source = FileSource::open(&self.root.join(REGISTRY), "application/json")
                .map_err(|err| DeliveryError::from_open(err, path))?;
            return Ok(sink.file_stream(source, FileClass::Registry));
        }

        if config.enable_browser {
            if let Some(file) = support::find(path) {
                return Ok(sink.support(file));
            }
        }

        driver::validate_inner_path(path)?;
        let full = self.root.join(path);
        if !full.is_file() {
            return Err(DeliveryError::NotFound(path.to_string()));
        }

        let source = FileSource::open(&full, self.tile_content_type(path))
            .map_err(|err| DeliveryError::from_open(err, path))?;
        Ok(sink.file_stream(source, FileClass::Data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_tileset(dir: &std::path::Path) {
        fs::write(
            dir.join(DESCRIPTOR),
            br#"{"name": "test", "tile_content_type": "image/png"}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.join("tiles/0")).unwrap();
        fs::write(dir.join("tiles/0/0.bin"), b"tile-bytes").unwrap();
    }

    fn open(dir: &std::path::Path) -> SharedDriver {
        let info = OpenInfo::probe(dir);
        TilesetDriver::open(&info, &OpenOptions::default())
            .unwrap()
            .expect("tileset should open")
    }

    #[test]
    fn test_open_requires_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let info = OpenInfo::probe(dir.path());
        let result = TilesetDriver::open(&info, &OpenOptions::default()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_open_rejects_malformed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DESCRIPTOR), b"{ not json").unwrap();
        let info = OpenInfo::probe(dir.path());
        let result = TilesetDriver::open(&info, &OpenOptions::default());
        assert!(matches!(result, Err(OpenError::Format(_))));
    }

    #[test]
    fn test_serves_descriptor_as_config() {
        let dir = tempfile::tempdir().unwrap();
        make_tileset(dir.path());
        let driver = open(dir.path());

        let config = LocationConfig::default();
        let sink = Sink::new(&config);
        let response = driver.handle(&sink, DESCRIPTOR, &config).unwrap();
        assert_eq!(response.stat().file_class, FileClass::Config);
        assert_eq!(response.stat().content_type, "application/json");
    }

    #[test]
    fn test_serves_tile_as_data() {
        let dir = tempfile::tempdir().unwrap();
        make_tileset(dir.path());
        let driver = open(dir.path());

        let config = LocationConfig::default();
        let sink = Sink::new(&config);
        let mut response = driver.handle(&sink, "tiles/0/0.bin", &config).unwrap();
        assert_eq!(response.stat().file_class, FileClass::Data);
        // unrecognized extension falls back to the descriptor's type
        assert_eq!(response.stat().content_type, "image/png");

        let mut buf = [0u8; 16];
        let n = response.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"tile-bytes");
    }

    #[test]
    fn test_missing_tile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        make_tileset(dir.path());
        let driver = open(dir.path());

        let config = LocationConfig::default();
        let sink = Sink::new(&config);
        let result = driver.handle(&sink, "tiles/9/9.bin", &config);
        assert!(matches!(result, Err(DeliveryError::NotFound(_))));
    }

    #[test]
    fn test_escaping_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        make_tileset(dir.path());
        let driver = open(dir.path());

        let config = LocationConfig::default();
        let sink = Sink::new(&config);
        let result = driver.handle(&sink, "tiles/../../etc/passwd", &config);
        assert!(matches!(result, Err(DeliveryError::BadRequest(_))));
    }

    #[test]
    fn test_browser_index_gated_by_config() {
        let dir = tempfile::tempdir().unwrap();
        make_tileset(dir.path());
        let driver = open(dir.path());

        let plain = LocationConfig::default();
        let sink = Sink::new(&plain);
        assert!(driver.handle(&sink, "", &plain).is_err());

        let browsing = LocationConfig::default().with_browser(true);
        let sink = Sink::new(&browsing);
        let response = driver.handle(&sink, "", &browsing).unwrap();
        assert_eq!(response.stat().file_class, FileClass::Support);
    }

    #[test]
    fn test_externally_changed_on_descriptor_touch() {
        let dir = tempfile::tempdir().unwrap();
        make_tileset(dir.path());
        let driver = open(dir.path());

        assert!(!driver.externally_changed().unwrap());

        // rewriting the descriptor moves its mtime
        let path = dir.path().join(DESCRIPTOR);
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        fs::write(&path, br#"{"name": "test2"}"#).unwrap();
        if fs::metadata(&path).unwrap().modified().unwrap() != mtime {
            assert!(driver.externally_changed().unwrap());
        }
    }

    #[test]
    fn test_resources_reflect_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        make_tileset(dir.path());
        let driver = open(dir.path());

        let resources = driver.resources();
        assert_eq!(resources.open_files, 1);
        assert!(resources.memory > 0);
    }
}
