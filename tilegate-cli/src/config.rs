//! Daemon configuration: TOML file plus command-line overrides.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use tilegate::config::LocationConfig;
use tilegate::delivery::CacheConfig;
use tilegate::fileclass::{FileClass, FileClassSettings};
use tilegate::support::Variables;

use crate::error::CliError;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3070";

/// The configuration file as written on disk.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub listen: Option<SocketAddr>,

    #[serde(default, rename = "location")]
    pub locations: Vec<LocationSection>,

    #[serde(default)]
    pub cache: CacheSection,
}

/// One `[[location]]` section.
#[derive(Debug, Deserialize)]
pub struct LocationSection {
    pub prefix: String,
    pub root: PathBuf,

    /// Resolve paths as datasets (default) or serve plain files.
    pub dataset: Option<bool>,
    #[serde(default)]
    pub browser: bool,
    #[serde(default)]
    pub listing: bool,

    /// Per file-class max-age in seconds; `-1` disables caching.
    #[serde(default)]
    pub max_age: BTreeMap<FileClass, i64>,

    /// Template variables for support-file expansion.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

/// The `[cache]` section.
#[derive(Debug, Default, Deserialize)]
pub struct CacheSection {
    /// Open-file budget; defaults to half the process fd limit.
    pub open_files: Option<u64>,
    /// Memory budget in bytes; unbounded by default.
    pub memory: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| CliError::Config(format!("{}: {err}", path.display())))?;
        toml::from_str(&raw).map_err(|err| CliError::Config(format!("{}: {err}", path.display())))
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub locations: Vec<LocationConfig>,
    pub cache: CacheConfig,
}

impl DaemonConfig {
    /// Merge the file configuration with command-line overrides. At
    /// least one serving location must come out of it.
    pub fn assemble(
        file: FileConfig,
        listen_flag: Option<SocketAddr>,
        root_flag: Option<PathBuf>,
        browser: bool,
        listing: bool,
        cache_open_files: Option<u64>,
    ) -> Result<Self, CliError> {
        let listen = listen_flag
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.parse().expect("default listen address"));

        let mut locations: Vec<LocationConfig> =
            file.locations.into_iter().map(build_location).collect();

        if let Some(root) = root_flag {
            locations.push(
                LocationConfig::new("/", root)
                    .with_browser(browser)
                    .with_listing(listing)
                    .with_vars(default_vars("/", &BTreeMap::new())),
            );
        }

        if locations.is_empty() {
            return Err(CliError::Config(
                "nothing to serve: give --root or a config file with locations".to_string(),
            ));
        }

        // longest prefix first, so the most specific location matches
        locations.sort_by(|a, b| b.location.len().cmp(&a.location.len()));

        let mut cache = CacheConfig::new();
        if let Some(limit) = cache_open_files.or(file.cache.open_files) {
            cache = cache.with_open_files_limit(limit);
        }
        if let Some(limit) = file.cache.memory {
            cache = cache.with_memory_limit(limit);
        }

        Ok(Self {
            listen,
            locations,
            cache,
        })
    }
}

fn build_location(section: LocationSection) -> LocationConfig {
    let mut settings = FileClassSettings::new();
    for (class, seconds) in &section.max_age {
        settings.set_max_age(*class, *seconds);
    }

    LocationConfig::new(section.prefix.clone(), section.root)
        .with_dataset(section.dataset.unwrap_or(true))
        .with_browser(section.browser)
        .with_listing(section.listing)
        .with_file_class_settings(settings)
        .with_vars(default_vars(&section.prefix, &section.vars))
}

fn default_vars(prefix: &str, overrides: &BTreeMap<String, String>) -> Variables {
    let mut vars = Variables::new()
        .with_var("version", tilegate::VERSION)
        .with_var("title", prefix);
    for (name, value) in overrides {
        vars.set(name, value);
    }
    vars
}
