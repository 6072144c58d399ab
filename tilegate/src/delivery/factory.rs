//! Driver factory: ordered format openers.

use crate::delivery::archive::ArchiveDriver;
use crate::delivery::driver::SharedDriver;
use crate::delivery::storage::StorageDriver;
use crate::delivery::tileset::TilesetDriver;
use crate::delivery::types::{OpenError, OpenInfo, OpenOptions};

/// Opens a dataset at a path. Implemented by [`DriverFactory`] for the
/// real formats; the delivery cache only depends on this trait.
pub trait OpenDriver: Send + Sync {
    fn open(&self, info: &OpenInfo, options: &OpenOptions) -> Result<SharedDriver, OpenError>;
}

/// Tries each known dataset format in a fixed priority order: directory
/// tileset, then storage, then archive. An opener that does not
/// recognize the path declines without error and the next one is tried;
/// if none accepts, the path has no dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverFactory;

impl DriverFactory {
    pub fn new() -> Self {
        Self
    }
}

impl OpenDriver for DriverFactory {
    fn open(&self, info: &OpenInfo, options: &OpenOptions) -> Result<SharedDriver, OpenError> {
        if let Some(driver) = TilesetDriver::open(info, options)? {
            return Ok(driver);
        }
        if let Some(driver) = StorageDriver::open(info, options)? {
            return Ok(driver);
        }
        if let Some(driver) = ArchiveDriver::open(info, options)? {
            return Ok(driver);
        }
        Err(OpenError::DatasetNotFound(
            info.path.display().to_string(),
        ))
    }
}
