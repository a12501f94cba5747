//! Ephemeral per-execution directories.
//!
//! Every directory handed out here is uniquely named and removed when its
//! owner is dropped, whichever way the execution ended.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, warn};

/// A directory deleted on drop.
#[derive(Debug)]
pub struct ScopedDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScopedDir {
    /// Create a fresh `<root>/<prefix>...` directory. Sibling entries under
    /// `root` may be created and removed concurrently.
    pub fn create(root: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
        // Container runtimes require absolute bind-mount sources.
        let root = fs::canonicalize(root).with_context(|| format!("resolve {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&root)
            .with_context(|| format!("create scoped directory in {}", root.display()))?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!(path = %self.path.display(), "removed scoped directory"),
            Err(e) => warn!(err = %e, path = %self.path.display(), "failed to remove scoped directory"),
        }
    }
}

/// Filesystem scope for one execution: input copy, script, and produced files.
#[derive(Debug)]
pub struct Workspace {
    dir: ScopedDir,
    script_name: String,
    input_name: Option<OsString>,
}

impl Workspace {
    pub fn create(root: &Path, script_name: &str) -> Result<Self> {
        Ok(Self {
            dir: ScopedDir::create(root, "ws-")?,
            script_name: script_name.to_string(),
            input_name: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy the input artifact into the workspace under its original basename.
    pub fn copy_input(&mut self, input: &Path) -> Result<PathBuf> {
        let name = input
            .file_name()
            .with_context(|| format!("input path has no file name: {}", input.display()))?
            .to_os_string();
        let dest = self.path().join(&name);
        fs::copy(input, &dest)
            .with_context(|| format!("copy {} to {}", input.display(), dest.display()))?;
        self.input_name = Some(name);
        Ok(dest)
    }

    pub fn write_script(&self, code: &str) -> Result<PathBuf> {
        let path = self.path().join(&self.script_name);
        fs::write(&path, code).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Move every entry except the input copy and the script into `staging`.
    ///
    /// Returns the moved entries' new paths sorted by file name.
    pub fn harvest_into(&self, staging: &Path) -> Result<Vec<PathBuf>> {
        let mut moved = Vec::new();
        let entries =
            fs::read_dir(self.path()).with_context(|| format!("read {}", self.path().display()))?;
        for entry in entries {
            let entry = entry.context("read workspace entry")?;
            let name = entry.file_name();
            if name == self.script_name.as_str() || self.input_name.as_ref() == Some(&name) {
                continue;
            }
            let dest = staging.join(&name);
            move_entry(&entry.path(), &dest)?;
            moved.push(dest);
        }
        moved.sort();
        debug!(count = moved.len(), "harvested workspace outputs");
        Ok(moved)
    }
}

fn move_entry(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems; fall back to copy.
    if from.is_dir() {
        copy_dir(from, to)?;
        fs::remove_dir_all(from).with_context(|| format!("remove {}", from.display()))
    } else {
        fs::copy(from, to)
            .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
        fs::remove_file(from).with_context(|| format!("remove {}", from.display()))
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).with_context(|| format!("create {}", to.display()))?;
    for entry in fs::read_dir(from).with_context(|| format!("read {}", from.display()))? {
        let entry = entry.context("read directory entry")?;
        let dest = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
