//! Persist accumulated artifacts to the output directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::sanitizer::RESULT_TABLE_FILE;
use crate::core::session::AccumulatedArtifacts;

/// File name of the persisted analysis script.
pub const CODE_FILE: &str = "analysis_code.py";

/// Output file name for the `index`-th image (0-based).
pub fn plot_file_name(index: usize) -> String {
    format!("plot_{}.png", index + 1)
}

/// Write the final code, result table, and plots into `output_dir`.
///
/// Only failure to create `output_dir` is an error. Each file is written
/// independently; a failed write is logged and left out of the manifest.
/// Existing files with the same names are overwritten.
#[instrument(skip_all, fields(output_dir = %output_dir.display(), images = artifacts.images.len()))]
pub fn finalize(artifacts: &AccumulatedArtifacts, output_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("create output dir {}", output_dir.display()))?;

    let mut manifest = Vec::new();
    let mut write = |name: &str, contents: &[u8]| {
        let path = output_dir.join(name);
        match fs::write(&path, contents) {
            Ok(()) => manifest.push(path),
            Err(e) => warn!(err = %e, path = %path.display(), "failed to write artifact"),
        }
    };

    if let Some(code) = &artifacts.last_code {
        write(CODE_FILE, code.as_bytes());
    }
    if let Some(table) = &artifacts.tabular_text {
        write(RESULT_TABLE_FILE, table.as_bytes());
    }
    for (index, image) in artifacts.images.iter().enumerate() {
        write(&plot_file_name(index), image);
    }

    info!(files = manifest.len(), "finalized artifacts");
    Ok(manifest)
}
