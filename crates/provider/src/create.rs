//! Build providers by scanning a directory tree.
//!
//! The builders share one contract: whatever happens during the scan, the
//! provider state accumulated so far is written to the output target before
//! the error surfaces. A crash halfway through a large scan therefore
//! leaves a resumable store file behind, and `resume` picks up from it.

use crate::annotations::Annotations;
use crate::error::{ErrorKind, Result};
use crate::image::ImageRecord;
use crate::provider::{AnnotationProvider, ImageProvider, Provider};
use crate::scan::{FoundFile, find_files};
use exn::{OptionExt, ResultExt};
use slidemap_identity::{ImageId, id_from_parts, resolve_partial};
use std::path::Path;

/// Knobs shared by the provider builders.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Identifier for a freshly created provider. Ignored with `resume`.
    pub identifier: Option<String>,
    /// Reload the output target and skip ids it already holds.
    pub resume: bool,
    /// Skip files whose record function fails instead of aborting.
    pub ignore_broken: bool,
    /// Hash file contents when building records from files.
    pub checksum: bool,
    /// Only accept these ids; others are narrowed by backward partial
    /// matching and skipped when nothing matches.
    pub valid_ids: Option<Vec<ImageId>>,
    /// Treat an ambiguous partial match as no match instead of an error.
    pub ignore_ambiguous: bool,
    /// Emit per-file progress events.
    pub progress: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            identifier: None,
            resume: false,
            ignore_broken: true,
            checksum: true,
            valid_ids: None,
            ignore_ambiguous: false,
            progress: false,
        }
    }
}

/// Default id function: the found file's path segments, tagged with the
/// provider identifier as site.
pub fn image_id_from_found(file: &FoundFile, identifier: &str) -> Result<Option<ImageId>> {
    id_from_parts(&file.path, &file.parts, Some(identifier)).or_raise(|| ErrorKind::Identity)
}

/// Default record function: file-level facts only.
pub fn image_record_from_found(file: &FoundFile, options: &CreateOptions) -> Result<ImageRecord> {
    ImageRecord::from_file(&file.path, options.checksum)
}

/// Scan `search_root` and build an image provider from matching files.
///
/// With an `output` target the accumulated provider is persisted there even
/// when the scan fails; a persist failure takes precedence over the scan
/// error.
#[tracing::instrument(skip_all, fields(root = %search_root.display(), glob = search_glob))]
pub fn create_image_provider<F, G>(
    search_root: &Path,
    search_glob: &str,
    output: Option<&Path>,
    options: &CreateOptions,
    id_fn: F,
    record_fn: G,
) -> Result<ImageProvider>
where
    F: Fn(&FoundFile, &str) -> Result<Option<ImageId>>,
    G: Fn(&FoundFile, &CreateOptions) -> Result<ImageRecord>,
{
    let found = find_files(search_root, search_glob)?;
    let mut provider = if options.resume {
        let path = output
            .ok_or_raise(|| ErrorKind::InvalidArgument("resume requires an output target".to_owned()))?;
        ImageProvider::load(path)?
    } else {
        ImageProvider::new(options.identifier.clone())
    };

    let scan_result = (|| {
        for file in &found {
            if options.progress {
                tracing::info!(path = %file.path.display(), "scanning");
            }
            let Some(id) = id_fn(file, provider.identifier())? else {
                continue;
            };
            let Some(id) = narrow_to_valid(id, options)? else {
                continue;
            };
            if options.resume && provider.contains(&id) {
                continue;
            }
            match record_fn(file, options) {
                Ok(record) => provider.insert(id, record)?,
                Err(error) if options.ignore_broken => {
                    tracing::warn!(path = %file.path.display(), %error, "skipping broken file");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    })();

    if let Some(path) = output {
        provider.persist(path)?;
    }
    scan_result?;
    Ok(provider)
}

/// Scan `search_root` and build an annotation provider from matching files.
///
/// Same persist guarantees as [`create_image_provider`]. The annotation
/// function may decline a file by returning `None`.
#[tracing::instrument(skip_all, fields(root = %search_root.display(), glob = search_glob))]
pub fn create_annotation_provider<F, G>(
    search_root: &Path,
    search_glob: &str,
    output: Option<&Path>,
    options: &CreateOptions,
    id_fn: F,
    annotations_fn: G,
) -> Result<AnnotationProvider>
where
    F: Fn(&FoundFile, &str) -> Result<Option<ImageId>>,
    G: Fn(&FoundFile) -> Result<Option<Annotations>>,
{
    let found = find_files(search_root, search_glob)?;
    let mut provider = if options.resume {
        let path = output
            .ok_or_raise(|| ErrorKind::InvalidArgument("resume requires an output target".to_owned()))?;
        AnnotationProvider::load(path)?
    } else {
        AnnotationProvider::new(options.identifier.clone())
    };

    let scan_result = (|| {
        for file in &found {
            if options.progress {
                tracing::info!(path = %file.path.display(), "scanning");
            }
            let Some(id) = id_fn(file, provider.identifier())? else {
                continue;
            };
            let Some(id) = narrow_to_valid(id, options)? else {
                continue;
            };
            if options.resume && provider.contains(&id) {
                continue;
            }
            match annotations_fn(file) {
                Ok(Some(annotations)) => provider.insert(id, annotations)?,
                Ok(None) => {}
                Err(error) if options.ignore_broken => {
                    tracing::warn!(path = %file.path.display(), %error, "skipping broken file");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    })();

    if let Some(path) = output {
        provider.persist(path)?;
    }
    scan_result?;
    Ok(provider)
}

/// Narrow `id` to the configured valid set, partially matching when the
/// exact id is not a member.
fn narrow_to_valid(id: ImageId, options: &CreateOptions) -> Result<Option<ImageId>> {
    let Some(valid) = &options.valid_ids else {
        return Ok(Some(id));
    };
    if valid.contains(&id) {
        return Ok(Some(id));
    }
    let matched = resolve_partial(valid.iter(), &id, options.ignore_ambiguous)
        .or_raise(|| ErrorKind::Identity)?;
    Ok(matched.cloned())
}
