//! Driver capability trait.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::LocationConfig;
use crate::delivery::types::{DeliveryError, Resources};
use crate::sink::{Response, Sink};

/// Handle over one opened dataset.
///
/// A driver owns the dataset's open resources (file handles, parsed
/// metadata) and serves intra-dataset paths. Instances are shared
/// between the cache and any in-flight requests; a driver must tolerate
/// concurrent `handle` calls, each of which produces an independent
/// [`Response`] with its own cursor state.
pub trait Driver: Send + Sync {
    /// Current resource cost, used only for eviction ranking.
    fn resources(&self) -> Resources;

    /// Whether the on-disk dataset diverged since this driver opened it.
    fn externally_changed(&self) -> io::Result<bool>;

    /// Whether this driver absorbs external changes by in-place
    /// replacement instead of full evict-and-reopen.
    fn hot_content(&self) -> bool {
        false
    }

    /// Serve one intra-dataset path.
    fn handle(
        &self,
        sink: &Sink<'_>,
        path: &str,
        config: &LocationConfig,
    ) -> Result<Response, DeliveryError>;
}

/// Shared driver handle: eviction drops the cache's reference while
/// in-flight readers keep theirs.
pub type SharedDriver = Arc<dyn Driver>;

/// Modification-time fingerprint used by drivers for change detection.
pub(crate) fn file_fingerprint(path: &Path) -> io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

/// Compare a stored fingerprint against the current one; a missing file
/// counts as changed.
pub(crate) fn fingerprint_changed(path: &Path, fingerprint: SystemTime) -> io::Result<bool> {
    match file_fingerprint(path) {
        Ok(current) => Ok(current != fingerprint),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err),
    }
}

/// Reject intra-dataset paths that could escape the dataset root.
pub(crate) fn validate_inner_path(path: &str) -> Result<(), DeliveryError> {
    let escapes = Path::new(path)
        .components()
        .any(|part| !matches!(part, std::path::Component::Normal(_)));
    if path.starts_with('/') || escapes {
        return Err(DeliveryError::BadRequest(format!(
            "invalid dataset path: {path}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_inner_path() {
        assert!(validate_inner_path("tiles/0/0/0.png").is_ok());
        assert!(validate_inner_path("tileset.json").is_ok());
        assert!(validate_inner_path("../secret").is_err());
        assert!(validate_inner_path("tiles/../../secret").is_err());
        assert!(validate_inner_path("/etc/passwd").is_err());
    }

    #[test]
    fn test_fingerprint_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"a").unwrap();

        let fingerprint = file_fingerprint(&path).unwrap();
        assert!(!fingerprint_changed(&path, fingerprint).unwrap());

        // a removed file counts as changed
        std::fs::remove_file(&path).unwrap();
        assert!(fingerprint_changed(&path, fingerprint).unwrap());
    }
}
