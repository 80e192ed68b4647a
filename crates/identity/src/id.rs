//! Identity keys for whole-slide images.
//!
//! An [`ImageId`] is an ordered list of string parts (typically the trailing
//! path segments of the source file) plus an optional acquisition site tag.
//! The canonical string form `ImageId('a', 'b', site='c')` and the JSON form
//! `{"image_id": [...], "site": ...}` round-trip through [`ImageId::from_str`]
//! and [`ImageId::from_json`].

use crate::error::{ErrorKind, Result};
use crate::parse;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::str::FromStr;

/// Unique identifier for an image in a dataset.
///
/// Immutable after construction; `parts` is guaranteed non-empty.
#[derive(Debug, Clone)]
pub struct ImageId {
    site: Option<String>,
    parts: Vec<String>,
}

impl ImageId {
    /// Create a new id from parts and an optional site.
    ///
    /// Rejects empty part lists, and rejects a first part that is itself a
    /// serialized id (a frequent caller mistake: re-wrapping an already
    /// serialized string instead of calling `from_str`/`from_json`).
    pub fn new<I, S>(parts: I, site: Option<S>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        let Some(first) = parts.first() else {
            exn::bail!(ErrorKind::InvalidArgument("can not create an empty ImageId".to_owned()));
        };
        if first.starts_with(parse::PREFIX) && first.ends_with(parse::SUFFIX) {
            exn::bail!(ErrorKind::InvalidArgument(
                "use ImageId::from_str() to convert a serialized id".to_owned(),
            ));
        }
        if first.starts_with('{') && first.ends_with('}') && first.contains("\"image_id\":") {
            exn::bail!(ErrorKind::InvalidArgument(
                "use ImageId::from_json() to convert a serialized json id".to_owned(),
            ));
        }
        Ok(Self { site: site.map(Into::into), parts })
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The last part, conventionally the filename.
    pub fn last(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    /// Serialize to the canonical JSON form with sorted keys.
    ///
    /// The `site` key is omitted entirely when absent, so ids without a site
    /// produce byte-identical output regardless of how they were built.
    pub fn to_json(&self) -> String {
        let mut map = serde_json::Map::new();
        let parts: Vec<serde_json::Value> =
            self.parts.iter().map(|p| serde_json::Value::String(p.clone())).collect();
        map.insert("image_id".to_owned(), serde_json::Value::Array(parts));
        if let Some(site) = &self.site {
            map.insert("site".to_owned(), serde_json::Value::String(site.clone()));
        }
        serde_json::Value::Object(map).to_string()
    }

    /// Deserialize from the canonical JSON form.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).or_raise(|| ErrorKind::Parse(input.to_owned()))
    }

    /// Accept either the canonical string form or the JSON form.
    pub fn from_any_str(input: &str) -> Result<Self> {
        if input.starts_with(parse::PREFIX) {
            input.parse()
        } else {
            Self::from_json(input)
        }
    }

    /// One-way opaque hash of the id, hex-encoded BLAKE3.
    ///
    /// By default only the last part is hashed, matching the equality
    /// fallback. Pass `full` to hash the whole canonical string.
    pub fn content_hash(&self, full: bool) -> String {
        if full {
            blake3::hash(self.to_string().as_bytes()).to_string()
        } else {
            blake3::hash(self.last().as_bytes()).to_string()
        }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(parse::PREFIX)?;
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&parse::quote(part))?;
        }
        if let Some(site) = &self.site {
            write!(f, ", site={}", parse::quote(site))?;
        }
        f.write_str(parse::SUFFIX)
    }
}

impl FromStr for ImageId {
    type Err = crate::error::Error;

    fn from_str(input: &str) -> Result<Self> {
        let (parts, site) = parse::canonical(input)?;
        Self::new(parts, site)
    }
}

// Equality intentionally ignores `site` when either side lacks one, so ids
// recovered from bare filenames still match their fully-qualified versions.
// Hashing covers the last part only, which both equality branches agree on.
impl PartialEq for ImageId {
    fn eq(&self, other: &Self) -> bool {
        if self.site.is_none() || other.site.is_none() {
            self.parts == other.parts
        } else {
            self.site == other.site && self.parts == other.parts
        }
    }
}

impl Eq for ImageId {}

impl Hash for ImageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.last().hash(state);
    }
}

#[derive(Serialize, Deserialize)]
struct IdRepr {
    image_id: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    site: Option<String>,
}

impl Serialize for ImageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        IdRepr { image_id: self.parts.clone(), site: self.site.clone() }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = IdRepr::deserialize(deserializer)?;
        Self::new(repr.image_id, repr.site).map_err(serde::de::Error::custom)
    }
}

/// Derive an id directly from the trailing path segments of a found file.
pub fn id_from_parts(_path: &Path, parts: &[String], site: Option<&str>) -> Result<Option<ImageId>> {
    ImageId::new(parts.iter().cloned(), site.map(String::from)).map(Some)
}

/// Like [`id_from_parts`] but with the file extension stripped from the last part.
pub fn id_from_parts_without_extension(
    _path: &Path,
    parts: &[String],
    site: Option<&str>,
) -> Result<Option<ImageId>> {
    let mut parts = parts.to_vec();
    if let Some(last) = parts.last_mut() {
        *last = Path::new(last.as_str()).with_extension("").to_string_lossy().into_owned();
    }
    ImageId::new(parts, site.map(String::from)).map(Some)
}
