//! Aggregate storage driver.
//!
//! A storage is a directory carrying a `storage.json` descriptor that
//! lists member tilesets; the driver serves a generated map
//! configuration pointing at them. Storages are hot content: when the
//! descriptor changes on disk the cache reopens the driver in place
//! instead of evicting the record.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::config::LocationConfig;
use crate::delivery::driver::{file_fingerprint, fingerprint_changed, Driver, SharedDriver};
use crate::delivery::types::{
    DeliveryError, OpenError, OpenInfo, OpenOptions, Resources, MIME_DIRECTORY,
};
use crate::fileclass::FileClass;
use crate::sink::{FileInfo, FileSource, Response, Sink};
use crate::support;

pub(crate) const DESCRIPTOR: &str = "storage.json";
const MAP_CONFIG: &str = "mapconfig.json";

/// The `storage.json` descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    /// Member tilesets, in stacking order.
    pub tilesets: Vec<String>,
}

/// Open storage.
pub struct StorageDriver {
    root: PathBuf,
    descriptor: StorageDescriptor,
    descriptor_size: u64,
    fingerprint: SystemTime,
}

impl StorageDriver {
    pub(crate) fn open(
        info: &OpenInfo,
        options: &OpenOptions,
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

        if options.forced_reopen {
            debug!(path = %info.path.display(), "reopening storage in place");
        }

        let descriptor: StorageDescriptor = serde_json::from_slice(&raw)
            .map_err(|err| OpenError::Format(format!("{}: {err}", descriptor_path.display())))?;
        let fingerprint = file_fingerprint(&descriptor_path)?;

        Ok(Some(Arc::new(Self {
            root: info.path.clone(),
            descriptor,
            descriptor_size: raw.len() as u64,
            fingerprint,
        })))
    }

    /// Generate the map configuration served at `mapconfig.json`.
    fn map_config(&self) -> String {
        let tilesets: Vec<serde_json::Value> = self
            .descriptor
            .tilesets
            .iter()
            .map(|name| {
                serde_json::json!({
                    "id": name,
                    "url": format!("./{name}/"),
                })
            })
            .collect();

        serde_json::json!({
            "name": &self.descriptor.name,
            "tilesets": tilesets,
        })
        .to_string()
    }
}

impl Driver for StorageDriver {
    fn resources(&self) -> Resources {
        Resources::new(1, self.descriptor_size)
    }

    fn externally_changed(&self) -> io::Result<bool> {
        fingerprint_changed(&self.root.join(DESCRIPTOR), self.fingerprint)
    }

    fn hot_content(&self) -> bool {
        true
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
            return Err(DeliveryError::NotFound("no storage index".to_string()));
        }

        if path == DESCRIPTOR {
            let source = FileSource::open(&self.root.join(DESCRIPTOR), "application/json")
                .map_err(|err| DeliveryError::from_open(err, path))?;
            return Ok(sink.file_stream(source, FileClass::Config));
        }

        if path == MAP_CONFIG {
            // generated content counts as modified now
            let info = FileInfo::new("application/json").with_file_class(FileClass::Config);
            return Ok(sink.content(Bytes::from(self.map_config()), info, MAP_CONFIG));
        }

        if config.enable_browser {
            if let Some(file) = support::find(path) {
                return Ok(sink.support(file));
            }
        }

        Err(DeliveryError::NotFound(path.to_string()))
    }
}
