//! Dataset path splitting.
//!
//! Paths that reference archive-based datasets embed the archive
//! filename in the middle of the request path; everything up to and
//! including the recognized extension (and a following separator, if
//! present) is the dataset root, the rest addresses content inside the
//! archive.

use std::path::Path;

/// Archive extensions recognized in request paths, matched
/// case-insensitively.
const ARCHIVE_EXTENSIONS: [&str; 2] = [".slpk", ".spk"];

/// A request path split into the dataset root and the path inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPath {
    pub dataset: String,
    pub file: String,
}

/// Split at the first case-insensitive archive extension, if any.
///
/// `"/maps/world.slpk/layers/0"` splits into `"/maps/world.slpk/"` and
/// `"layers/0"`. A path ending at the extension (`"/maps/world.slpk"`)
/// falls back to the parent-directory split so the archive file itself
/// becomes the addressed entry.
pub fn split_archive_path(path: &str) -> Option<SplitPath> {
    let lower = path.to_ascii_lowercase();

    for ext in ARCHIVE_EXTENSIONS {
        let Some(pos) = lower.find(ext) else {
            continue;
        };

        let mut end = pos + ext.len();
        if lower.as_bytes().get(end) == Some(&b'/') {
            end += 1;
        }

        if end >= path.len() {
            return Some(parent_split(path));
        }
        return Some(SplitPath {
            dataset: path[..end].to_string(),
            file: path[end..].to_string(),
        });
    }

    None
}

/// Split any request path: archive split when an archive extension is
/// present, otherwise parent directory plus filename.
pub fn split_dataset_path(path: &str) -> SplitPath {
    split_archive_path(path).unwrap_or_else(|| parent_split(path))
}

fn parent_split(path: &str) -> SplitPath {
    let p = Path::new(path);
    let dataset = p
        .parent()
        .map(|parent| parent.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = p
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    SplitPath { dataset, file }
}
