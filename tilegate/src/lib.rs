//! tilegate - tileset and archive delivery core
//!
//! This library maps request paths onto long-lived dataset drivers and
//! streams byte ranges out of several on-disk tileset/archive layouts.
//! The HTTP transport lives in the `tilegate` binary; this crate never
//! touches sockets.
//!
//! # High-Level API
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilegate::config::LocationConfig;
//! use tilegate::delivery::{CacheConfig, DeliveryCache, DriverFactory, OpenOptions};
//! use tilegate::sink::Sink;
//!
//! let cache = DeliveryCache::new(Arc::new(DriverFactory::new()), CacheConfig::default());
//! let location = LocationConfig::new("/", "/srv/tilesets");
//!
//! let driver = cache.get("/srv/tilesets/world", &OpenOptions::default()).await?;
//! let response = driver.handle(&Sink::new(&location), "tiles/0/0/0.png", &location)?;
//! ```

pub mod config;
pub mod delivery;
pub mod fileclass;
pub mod logging;
pub mod sink;
pub mod support;

/// Version of the tilegate library and daemon.
///
/// Synchronized across all workspace components via `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
