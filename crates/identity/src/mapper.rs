//! Per-site filesystem mapping for image ids.
//!
//! Each acquisition site can describe how its id parts lay out on disk. The
//! registry is an explicit value passed to the call sites that need it, with
//! a filename passthrough mapper pre-registered for ids without a site.

use crate::error::{ErrorKind, Result};
use crate::id::ImageId;
use exn::OptionExt;
use std::collections::HashMap;
use std::path::PathBuf;

/// Site-specific mapping between id parts and relative filesystem paths.
pub trait PathMapper: Send + Sync {
    /// Names of the fields that identify an image at this site.
    fn id_field_names(&self) -> &[&str];

    /// Relative path segments for the given id parts.
    fn fs_parts(&self, parts: &[String]) -> Vec<String>;
}

/// Fallback mapper: the id parts already are the path segments.
#[derive(Debug, Default)]
pub struct FilenameMapper;

impl PathMapper for FilenameMapper {
    fn id_field_names(&self) -> &[&str] {
        &["filename"]
    }

    fn fs_parts(&self, parts: &[String]) -> Vec<String> {
        parts.to_vec()
    }
}

/// Registry of [`PathMapper`]s keyed by site.
///
/// Registration is append-only; a second mapper for the same site is an
/// error rather than a silent replacement.
pub struct MapperRegistry {
    mappers: HashMap<Option<String>, Box<dyn PathMapper>>,
}

impl Default for MapperRegistry {
    fn default() -> Self {
        let mut mappers: HashMap<Option<String>, Box<dyn PathMapper>> = HashMap::new();
        mappers.insert(None, Box::new(FilenameMapper));
        Self { mappers }
    }
}

impl MapperRegistry {
    pub fn register(&mut self, site: impl Into<String>, mapper: Box<dyn PathMapper>) -> Result<()> {
        if mapper.id_field_names().is_empty() {
            exn::bail!(ErrorKind::InvalidArgument(
                "mapper must declare at least one id field name".to_owned(),
            ));
        }
        let site = site.into();
        if self.mappers.contains_key(&Some(site.clone())) {
            exn::bail!(ErrorKind::InvalidArgument(format!("mapper for site {site:?} already registered")));
        }
        self.mappers.insert(Some(site), mapper);
        Ok(())
    }

    pub fn get(&self, site: Option<&str>) -> Result<&dyn PathMapper> {
        self.mappers
            .get(&site.map(str::to_owned))
            .map(Box::as_ref)
            .ok_or_raise(|| ErrorKind::UnknownSite(site.unwrap_or("<none>").to_owned()))
    }
}

impl ImageId {
    /// The id as a relative path, laid out by the mapper for its site.
    pub fn to_path(&self, registry: &MapperRegistry) -> Result<PathBuf> {
        let mapper = registry.get(self.site())?;
        Ok(mapper.fs_parts(self.parts()).iter().collect())
    }

    /// Field names identifying this image, with the leading `site` column.
    pub fn id_field_names(&self, registry: &MapperRegistry) -> Result<Vec<String>> {
        let mapper = registry.get(self.site())?;
        let mut names = vec!["site".to_owned()];
        names.extend(mapper.id_field_names().iter().map(|n| (*n).to_owned()));
        Ok(names)
    }
}
