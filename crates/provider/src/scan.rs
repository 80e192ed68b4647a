//! Glob-filtered discovery of dataset files.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use globset::Glob;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file found under the search root, with the path segments below the
/// root that identify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFile {
    pub path: PathBuf,
    pub parts: Vec<String>,
}

/// Walk `root` and return every file whose root-relative path matches
/// `glob`, sorted by path for reproducible scans.
#[tracing::instrument(skip_all, fields(root = %root.display(), glob))]
pub fn find_files(root: &Path, glob: &str) -> Result<Vec<FoundFile>> {
    let matcher = Glob::new(glob)
        .or_raise(|| ErrorKind::InvalidArgument(format!("invalid glob pattern {glob:?}")))?
        .compile_matcher();

    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.or_raise(|| ErrorKind::Scan)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).or_raise(|| ErrorKind::Scan)?;
        if !matcher.is_match(relative) {
            continue;
        }
        let parts = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        found.push(FoundFile { path: entry.path().to_path_buf(), parts });
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(files = found.len(), "scan finished");
    Ok(found)
}
