//! Artifact harvesting from an execution directory.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::core::sanitizer::RESULT_TABLE_FILE;

/// Extensions collected as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["png"];

/// Artifacts read from a directory after execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedArtifacts {
    /// Image bytes in file-name order.
    pub images: Vec<Vec<u8>>,
    pub tabular_text: Option<String>,
}

/// Read images and the result table from the top level of `dir`.
///
/// Never fails: unreadable entries are logged and skipped so a partially
/// broken run still yields whatever it produced.
pub fn collect_artifacts(dir: &Path) -> CollectedArtifacts {
    let mut collected = CollectedArtifacts::default();

    let mut image_paths = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image(path))
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!(err = %e, dir = %dir.display(), "failed to list artifacts");
            return collected;
        }
    };
    image_paths.sort();

    for path in image_paths {
        match fs::read(&path) {
            Ok(bytes) => collected.images.push(bytes),
            Err(e) => warn!(err = %e, path = %path.display(), "failed to read image"),
        }
    }

    let table_path = dir.join(RESULT_TABLE_FILE);
    if table_path.is_file() {
        match fs::read(&table_path) {
            Ok(bytes) if !bytes.is_empty() => {
                collected.tabular_text = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(_) => {}
            Err(e) => warn!(err = %e, path = %table_path.display(), "failed to read result table"),
        }
    }

    debug!(
        images = collected.images.len(),
        has_table = collected.tabular_text.is_some(),
        "collected artifacts"
    );
    collected
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}
