//! File classification for cache-control policy.
//!
//! Every served file falls into one coarse category that selects how long
//! clients may cache it. The category carries no other meaning.

use serde::{Deserialize, Serialize};

/// Max-age value meaning "never cache".
pub const NEVER_CACHE: i64 = -1;

/// Coarse content category of a served file.
///
/// `Unknown` must stay the last variant: the per-class settings table is
/// indexed by the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    /// Dataset configuration (descriptors, generated map configuration).
    Config,
    /// Embedded browser support files.
    Support,
    /// Registry files shared between datasets.
    Registry,
    /// Tile and resource payloads.
    Data,
    /// Anything not explicitly classified (directory listings etc.).
    Unknown,
}

const CLASS_COUNT: usize = FileClass::Unknown as usize + 1;

impl FileClass {
    /// All classes, in table order.
    pub const ALL: [FileClass; CLASS_COUNT] = [
        FileClass::Config,
        FileClass::Support,
        FileClass::Registry,
        FileClass::Data,
        FileClass::Unknown,
    ];

    /// Lowercase name, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileClass::Config => "config",
            FileClass::Support => "support",
            FileClass::Registry => "registry",
            FileClass::Data => "data",
            FileClass::Unknown => "unknown",
        }
    }
}

/// Per-class cache max-age policy for one serving location.
///
/// Configured once at startup and shared read-only between requests.
/// `Unknown` defaults to [`NEVER_CACHE`]; every other class defaults to
/// `0` ("no explicit directive").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileClassSettings {
    max_ages: [i64; CLASS_COUNT],
}

impl Default for FileClassSettings {
    fn default() -> Self {
        let mut settings = Self {
            max_ages: [0; CLASS_COUNT],
        };
        // unknown files are never cached, e.g. directory listings
        settings.set_max_age(FileClass::Unknown, NEVER_CACHE);
        settings
    }
}

impl FileClassSettings {
    /// Create settings with the defaults described above.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the max-age (seconds) for one class. Negative means never cache.
    pub fn set_max_age(&mut self, class: FileClass, seconds: i64) {
        self.max_ages[class as usize] = seconds;
    }

    /// Builder-style variant of [`set_max_age`](Self::set_max_age).
    pub fn with_max_age(mut self, class: FileClass, seconds: i64) -> Self {
        self.set_max_age(class, seconds);
        self
    }

    /// Max-age (seconds) for the given class.
    pub fn max_age(&self, class: FileClass) -> i64 {
        self.max_ages[class as usize]
    }
}
