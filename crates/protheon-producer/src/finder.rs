//! Source file discovery

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::claims::ClaimSet;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FileFinder {
    root: PathBuf,
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    match path.extension() {
        Some(ext) => ext == wanted,
        None => wanted.is_empty(),
    }
}

impl FileFinder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the root once and collect every file with `extension` (`zst` or
    /// `.zst`) into a [`ClaimSet`] keyed by file name.
    ///
    /// Hidden directories below the root are skipped, as are directories we
    /// are not allowed to read. Any other walk error is returned.
    pub fn find_by_extension(&self, extension: &str) -> Result<ClaimSet> {
        let claims = ClaimSet::new();

        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden_dir(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.io_error().map(|e| e.kind()) == Some(ErrorKind::PermissionDenied) => {
                    warn!(path = ?err.path(), "Skipping unreadable path");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if !entry.file_type().is_file() || !has_extension(entry.path(), extension) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(previous) = claims.insert(name.clone(), entry.path()) {
                warn!(
                    file = %name,
                    replaced = %previous.path.display(),
                    kept = %entry.path().display(),
                    "Duplicate file name, keeping the later one"
                );
            }
        }

        debug!(root = %self.root.display(), files = claims.len(), "Source scan complete");
        Ok(claims)
    }
}
