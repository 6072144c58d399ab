//! Per-location serving configuration.
//!
//! A location binds a URL prefix to a filesystem root together with the
//! feature switches and cache policy that apply beneath it. Locations
//! are built once at startup and shared read-only between requests.

use std::path::PathBuf;

use crate::fileclass::FileClassSettings;
use crate::support::Variables;

/// Configuration of one serving location.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    /// URL prefix this location answers for (e.g. `/`).
    pub location: String,
    /// Resolve paths beneath this location as datasets.
    pub enable_dataset: bool,
    /// Serve embedded browser support files from datasets.
    pub enable_browser: bool,
    /// Allow directory listings outside datasets.
    pub enable_listing: bool,
    /// Filesystem root the location maps to.
    pub root: PathBuf,
    /// Template variables for support-file expansion.
    pub vars: Variables,
    /// Cache policy per file class.
    pub file_class_settings: FileClassSettings,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            location: "/".to_string(),
            enable_dataset: true,
            enable_browser: false,
            enable_listing: false,
            root: PathBuf::from("."),
            vars: Variables::new(),
            file_class_settings: FileClassSettings::new(),
        }
    }
}

impl LocationConfig {
    pub fn new(location: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_browser(mut self, enable: bool) -> Self {
        self.enable_browser = enable;
        self
    }

    pub fn with_listing(mut self, enable: bool) -> Self {
        self.enable_listing = enable;
        self
    }

    pub fn with_dataset(mut self, enable: bool) -> Self {
        self.enable_dataset = enable;
        self
    }

    pub fn with_file_class_settings(mut self, settings: FileClassSettings) -> Self {
        self.file_class_settings = settings;
        self
    }

    pub fn with_vars(mut self, vars: Variables) -> Self {
        self.vars = vars;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileclass::FileClass;

    #[test]
    fn test_defaults() {
        let config = LocationConfig::default();
        assert_eq!(config.location, "/");
        assert!(config.enable_dataset);
        assert!(!config.enable_browser);
        assert!(!config.enable_listing);
    }

    #[test]
    fn test_builder() {
        let settings = FileClassSettings::new().with_max_age(FileClass::Data, 600);
        let config = LocationConfig::new("/maps", "/srv/tilesets")
            .with_browser(true)
            .with_file_class_settings(settings.clone());

        assert_eq!(config.location, "/maps");
        assert_eq!(config.root, PathBuf::from("/srv/tilesets"));
        assert!(config.enable_browser);
        assert_eq!(config.file_class_settings, settings);
    }
}
