//! Dataset delivery: drivers, the driver factory and the delivery
//! cache.
//!
//! A driver is a long-lived handle over one opened dataset. The factory
//! maps paths onto drivers by trying each known format in priority
//! order; the cache keeps open drivers around, bounds their total
//! resource cost and retires idle or externally changed entries.

mod archive;
mod cache;
mod driver;
mod factory;
mod path;
mod storage;
mod tileset;
mod types;

pub use archive::ArchiveDriver;
pub use cache::{CacheConfig, DeliveryCache};
pub use driver::{Driver, SharedDriver};
pub use factory::{DriverFactory, OpenDriver};
pub use path::{split_archive_path, split_dataset_path, SplitPath};
pub use storage::{StorageDescriptor, StorageDriver};
pub use tileset::{TilesetDescriptor, TilesetDriver};
pub use types::{
    DeliveryError, OpenError, OpenInfo, OpenOptions, Resources, MIME_DIRECTORY, MIME_ZIP,
};
