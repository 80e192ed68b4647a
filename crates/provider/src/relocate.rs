//! Re-associate stored image paths after a dataset moved on disk.
//!
//! Records keep whatever path the original scan saw. When the files move,
//! the ids and acquisition metadata are still good; only the paths are
//! stale. [`reassociate_paths`] rescans the tree and matches every found
//! file backward against the stored paths, so a record follows its file
//! to the new location without being re-ingested.

use crate::error::{ErrorKind, Result};
use crate::image::ImageRecord;
use crate::provider::{ImageProvider, Provider};
use crate::scan::find_files;
use exn::{OptionExt, ResultExt};
use slidemap_identity::{ImageId, resolve_partial};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct RelocateOptions {
    /// Persist the updated provider back to its own store file.
    pub inplace: bool,
    /// Treat an ambiguous path match as no match instead of an error.
    pub ignore_ambiguous: bool,
    /// Emit per-file progress events.
    pub progress: bool,
}

/// Rescan `search_root` and point the provider at `provider_path` to the
/// new locations of its files.
///
/// Each found file is matched leaf-first against the stored paths; a unique
/// match replaces that record's path. Stored paths nothing matched are left
/// alone. Returns the updated provider.
#[tracing::instrument(skip_all, fields(root = %search_root.display(), glob = search_glob))]
pub fn reassociate_paths(
    search_root: &Path,
    search_glob: &str,
    provider_path: &Path,
    options: &RelocateOptions,
) -> Result<ImageProvider> {
    let found = find_files(search_root, search_glob)?;
    let mut provider = ImageProvider::load(provider_path)?;

    // stored paths in key order; these are the match candidates
    let mut stored: Vec<(ImageId, PathBuf)> = Vec::with_capacity(provider.len());
    for id in provider.keys() {
        let record = provider
            .get(&id)?
            .ok_or_raise(|| ErrorKind::NotFound(id.to_string()))?;
        let urlpath = PathBuf::from(&record.urlpath);
        stored.push((id, urlpath));
    }
    let candidates: Vec<&Path> = stored.iter().map(|(_, path)| path.as_path()).collect();

    // a later found file matching the same stored path wins
    let mut moved: HashMap<&Path, &Path> = HashMap::new();
    for file in &found {
        if options.progress {
            tracing::info!(path = %file.path.display(), "matching");
        }
        let matched =
            resolve_partial(candidates.iter().copied(), file.path.as_path(), options.ignore_ambiguous)
                .or_raise(|| ErrorKind::Identity)?;
        if let Some(current) = matched {
            moved.insert(current, file.path.as_path());
        }
    }

    let mut changed = 0usize;
    for (id, current) in &stored {
        let Some(new_path) = moved.get(current.as_path()) else {
            continue;
        };
        let new_urlpath = new_path.to_string_lossy().into_owned();
        let record = provider
            .get(id)?
            .ok_or_raise(|| ErrorKind::NotFound(id.to_string()))?;
        if record.urlpath == new_urlpath {
            continue;
        }
        let mut record: ImageRecord = record.clone();
        record.urlpath = new_urlpath;
        provider.insert(id.clone(), record)?;
        changed += 1;
    }
    tracing::info!(files = found.len(), reassociated = changed, "path re-association finished");

    if options.inplace {
        provider.persist(provider_path)?;
    }
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn id(part: &str) -> ImageId {
        ImageId::new([part], None).unwrap()
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"slide").unwrap();
    }

    fn seeded_provider(paths: &[(&str, &str)], store: &Path) {
        let mut provider = ImageProvider::new(Some("prov".to_owned()));
        for (part, urlpath) in paths {
            provider.insert(id(part), ImageRecord::new(*urlpath)).unwrap();
        }
        provider.persist(store).unwrap();
    }

    #[test]
    fn moved_files_update_their_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("images.arrow");
        seeded_provider(
            &[("1.svs", "/old/scans/1.svs"), ("2.svs", "/old/scans/2.svs")],
            &store,
        );
        touch(&dir.path().join("new/1.svs"));
        touch(&dir.path().join("new/2.svs"));

        let mut provider =
            reassociate_paths(dir.path(), "new/*.svs", &store, &RelocateOptions::default()).unwrap();

        let record = provider.get(&id("1.svs")).unwrap().unwrap();
        assert!(record.urlpath.ends_with("new/1.svs"));
        let record = provider.get(&id("2.svs")).unwrap().unwrap();
        assert!(record.urlpath.ends_with("new/2.svs"));
    }

    #[test]
    fn unmatched_records_keep_their_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("images.arrow");
        seeded_provider(
            &[("1.svs", "/old/scans/1.svs"), ("gone.svs", "/old/scans/gone.svs")],
            &store,
        );
        touch(&dir.path().join("new/1.svs"));

        let mut provider =
            reassociate_paths(dir.path(), "new/*.svs", &store, &RelocateOptions::default()).unwrap();

        assert!(provider.get(&id("1.svs")).unwrap().unwrap().urlpath.ends_with("new/1.svs"));
        assert_eq!(provider.get(&id("gone.svs")).unwrap().unwrap().urlpath, "/old/scans/gone.svs");
    }

    #[test]
    fn inplace_persists_the_updated_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("images.arrow");
        seeded_provider(&[("1.svs", "/old/scans/1.svs")], &store);
        touch(&dir.path().join("new/1.svs"));

        let options = RelocateOptions { inplace: true, ..RelocateOptions::default() };
        reassociate_paths(dir.path(), "new/*.svs", &store, &options).unwrap();

        let mut reloaded = ImageProvider::load(&store).unwrap();
        assert!(reloaded.get(&id("1.svs")).unwrap().unwrap().urlpath.ends_with("new/1.svs"));
    }

    #[test]
    fn ambiguous_matches_error_unless_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("images.arrow");
        // two records share the same single-component stored path, so any
        // found 1.svs matches both and the query exhausts with two survivors
        seeded_provider(&[("a.svs", "1.svs"), ("b.svs", "1.svs")], &store);
        touch(&dir.path().join("new/1.svs"));

        let err = reassociate_paths(dir.path(), "new/*.svs", &store, &RelocateOptions::default())
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Identity));

        let tolerant = RelocateOptions { ignore_ambiguous: true, ..RelocateOptions::default() };
        let mut provider = reassociate_paths(dir.path(), "new/*.svs", &store, &tolerant).unwrap();
        assert_eq!(provider.get(&id("a.svs")).unwrap().unwrap().urlpath, "1.svs");
    }
}
