//! Identity-addressed providers backed by a persisted table.
//!
//! A provider pairs a columnar table (what was loaded from, or will be
//! written to, a store file) with an in-memory overlay of pending changes.
//! Reads consult the overlay first and cache table hits there; `persist`
//! flattens the overlay into the table, writes the store file, and clears
//! the overlay.
//!
//! Table rows are addressed by the exact canonical id string while the
//! overlay is addressed by id equality. The two can disagree for ids whose
//! site tag differs; this is long-standing behavior that consumers rely on,
//! so it is kept rather than unified.

use crate::annotations::{self, AnnotationEntry, Annotations};
use crate::error::{ErrorKind, Result};
use crate::image::{self, ImageRecord};
use exn::ResultExt;
use indexmap::IndexMap;
use serde_json::Value;
use slidemap_store::{
    Envelope, KEY_CREATED_AT, KEY_CREATED_BY, KEY_SOFTWARE_VERSION, KEY_STORE_TYPE,
    KEY_STORE_VERSION, Store, StoreKind, StoreType,
};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

pub const PROVIDER_VERSION: u64 = 1;
pub const KEY_PROVIDER_VERSION: &str = "provider_version";

pub use slidemap_identity::ImageId;

/// Common surface of image and annotation providers.
///
/// `get` takes `&mut self` because table hits are cached in the overlay.
pub trait Provider {
    type Record;

    fn identifier(&self) -> &str;
    fn contains(&self, id: &ImageId) -> bool;
    fn get(&mut self, id: &ImageId) -> Result<Option<&Self::Record>>;
    fn insert(&mut self, id: ImageId, record: Self::Record) -> Result<()>;
    fn remove(&mut self, id: &ImageId) -> Result<()>;
    fn keys(&self) -> Vec<ImageId>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct TableRow<R> {
    id: ImageId,
    row: R,
}

fn fresh_identifier(identifier: Option<String>) -> String {
    identifier.unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn version_hooks(
    metadata: &BTreeMap<String, Value>,
) -> slidemap_store::error::Result<BTreeMap<String, Value>> {
    use slidemap_store::error::ErrorKind as StoreErrorKind;
    let found = metadata.get(KEY_PROVIDER_VERSION).and_then(Value::as_u64).unwrap_or(0);
    if found < PROVIDER_VERSION {
        exn::bail!(StoreErrorKind::VersionTooOld { found, expected: PROVIDER_VERSION });
    }
    if found > PROVIDER_VERSION {
        exn::bail!(StoreErrorKind::VersionTooNew { found, expected: PROVIDER_VERSION });
    }
    Ok(BTreeMap::from([(KEY_PROVIDER_VERSION.to_owned(), Value::from(found))]))
}

pub(crate) struct ImageStoreKind;

impl StoreKind for ImageStoreKind {
    const STORE_TYPE: StoreType = StoreType::Image;
    const VERSION: u64 = 1;

    fn metadata_set_hook(metadata: &mut BTreeMap<String, Value>) {
        metadata.insert(KEY_PROVIDER_VERSION.to_owned(), Value::from(PROVIDER_VERSION));
    }

    fn metadata_get_hook(
        metadata: &BTreeMap<String, Value>,
    ) -> slidemap_store::error::Result<BTreeMap<String, Value>> {
        version_hooks(metadata)
    }
}

pub(crate) struct AnnotationStoreKind;

impl StoreKind for AnnotationStoreKind {
    const STORE_TYPE: StoreType = StoreType::Annotation;
    const VERSION: u64 = 1;

    fn metadata_set_hook(metadata: &mut BTreeMap<String, Value>) {
        metadata.insert(KEY_PROVIDER_VERSION.to_owned(), Value::from(PROVIDER_VERSION));
    }

    fn metadata_get_hook(
        metadata: &BTreeMap<String, Value>,
    ) -> slidemap_store::error::Result<BTreeMap<String, Value>> {
        version_hooks(metadata)
    }
}

/// Reject store files whose envelope carries keys this provider version
/// does not know about.
fn check_metadata_keys(envelope: &Envelope) -> Result<()> {
    let mut expected = [
        KEY_STORE_TYPE,
        KEY_STORE_VERSION,
        KEY_SOFTWARE_VERSION,
        KEY_PROVIDER_VERSION,
        KEY_CREATED_AT,
        KEY_CREATED_BY,
    ];
    expected.sort_unstable();
    let found: Vec<&str> = envelope.metadata.keys().map(String::as_str).collect();
    if found != expected {
        exn::bail!(ErrorKind::Format(format!("unexpected provider metadata keys: {found:?}")));
    }
    Ok(())
}

/// Image metadata records addressed by [`ImageId`].
#[derive(Debug)]
pub struct ImageProvider {
    identifier: String,
    table: IndexMap<String, TableRow<ImageRecord>>,
    overlay: IndexMap<ImageId, ImageRecord>,
}

impl ImageProvider {
    pub fn new(identifier: Option<String>) -> Self {
        Self {
            identifier: fresh_identifier(identifier),
            table: IndexMap::new(),
            overlay: IndexMap::new(),
        }
    }

    /// Load a provider from a store file written by [`persist`](Self::persist).
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let envelope = Store::<ImageStoreKind>::new().read(path).or_raise(|| ErrorKind::Store)?;
        check_metadata_keys(&envelope)?;
        let rows = image::from_batch(&envelope.batch)?;
        let mut table = IndexMap::with_capacity(rows.len());
        for (key, row) in rows {
            let id: ImageId = key.parse::<ImageId>().or_raise(|| ErrorKind::Identity)?;
            table.insert(key, TableRow { id, row });
        }
        tracing::info!(identifier = %envelope.identifier, rows = table.len(), "loaded image provider");
        Ok(Self { identifier: envelope.identifier, table, overlay: IndexMap::new() })
    }

    /// Flatten the overlay into the table, write the store file, and clear
    /// the overlay.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        for (id, record) in self.overlay.drain(..) {
            self.table.insert(id.to_string(), TableRow { id, row: record });
        }
        let batch = image::to_batch(self.table.iter().map(|(key, entry)| (key.as_str(), &entry.row)))?;
        Store::<ImageStoreKind>::new()
            .write(&batch, path, &self.identifier, &BTreeMap::new())
            .or_raise(|| ErrorKind::Store)?;
        tracing::info!(identifier = %self.identifier, rows = self.table.len(), "persisted image provider");
        Ok(())
    }
}

impl Provider for ImageProvider {
    type Record = ImageRecord;

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn contains(&self, id: &ImageId) -> bool {
        self.overlay.contains_key(id) || self.table.contains_key(&id.to_string())
    }

    fn get(&mut self, id: &ImageId) -> Result<Option<&ImageRecord>> {
        if !self.overlay.contains_key(id) {
            let Some(entry) = self.table.get(&id.to_string()) else {
                return Ok(None);
            };
            self.overlay.insert(entry.id.clone(), entry.row.clone());
        }
        Ok(self.overlay.get(id))
    }

    fn insert(&mut self, id: ImageId, record: ImageRecord) -> Result<()> {
        record.validate()?;
        self.overlay.insert(id, record);
        Ok(())
    }

    fn remove(&mut self, id: &ImageId) -> Result<()> {
        let in_overlay = self.overlay.shift_remove(id).is_some();
        let in_table = self.table.shift_remove(&id.to_string()).is_some();
        if !in_overlay && !in_table {
            exn::bail!(ErrorKind::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn keys(&self) -> Vec<ImageId> {
        let mut keys: Vec<ImageId> = self.table.values().map(|entry| entry.id.clone()).collect();
        keys.extend(
            self.overlay
                .keys()
                .filter(|id| !self.table.contains_key(&id.to_string()))
                .cloned(),
        );
        keys
    }

    fn len(&self) -> usize {
        self.keys().len()
    }
}

/// Annotation sets addressed by [`ImageId`].
///
/// Table rows stay as flat entry lists until first read, then materialize
/// into [`Annotations`] in the overlay.
pub struct AnnotationProvider {
    identifier: String,
    table: IndexMap<String, TableRow<Vec<AnnotationEntry>>>,
    overlay: IndexMap<ImageId, Annotations>,
}

impl AnnotationProvider {
    pub fn new(identifier: Option<String>) -> Self {
        Self {
            identifier: fresh_identifier(identifier),
            table: IndexMap::new(),
            overlay: IndexMap::new(),
        }
    }

    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let envelope =
            Store::<AnnotationStoreKind>::new().read(path).or_raise(|| ErrorKind::Store)?;
        check_metadata_keys(&envelope)?;
        let rows = annotations::from_batch(&envelope.batch)?;
        let mut table = IndexMap::with_capacity(rows.len());
        for (key, row) in rows {
            let id: ImageId = key.parse::<ImageId>().or_raise(|| ErrorKind::Identity)?;
            table.insert(key, TableRow { id, row });
        }
        tracing::info!(
            identifier = %envelope.identifier,
            images = table.len(),
            "loaded annotation provider"
        );
        Ok(Self { identifier: envelope.identifier, table, overlay: IndexMap::new() })
    }

    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        for (id, record) in self.overlay.drain(..) {
            self.table.insert(id.to_string(), TableRow { id, row: record.entries });
        }
        let batch = annotations::to_batch(
            self.table.iter().map(|(key, entry)| (key.as_str(), entry.row.as_slice())),
        )?;
        Store::<AnnotationStoreKind>::new()
            .write(&batch, path, &self.identifier, &BTreeMap::new())
            .or_raise(|| ErrorKind::Store)?;
        tracing::info!(identifier = %self.identifier, images = self.table.len(), "persisted annotation provider");
        Ok(())
    }
}

impl Provider for AnnotationProvider {
    type Record = Annotations;

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn contains(&self, id: &ImageId) -> bool {
        self.overlay.contains_key(id) || self.table.contains_key(&id.to_string())
    }

    fn get(&mut self, id: &ImageId) -> Result<Option<&Annotations>> {
        if !self.overlay.contains_key(id) {
            let Some(entry) = self.table.get(&id.to_string()) else {
                return Ok(None);
            };
            let materialized = Annotations::for_image(entry.id.clone(), entry.row.clone());
            self.overlay.insert(entry.id.clone(), materialized);
        }
        Ok(self.overlay.get(id))
    }

    fn insert(&mut self, id: ImageId, mut record: Annotations) -> Result<()> {
        match &record.image_id {
            None => record.image_id = Some(id.clone()),
            Some(declared) if *declared != id => {
                exn::bail!(ErrorKind::InvalidArgument(format!(
                    "image ids don't match: {id} vs {declared}"
                )));
            }
            Some(_) => {}
        }
        self.overlay.insert(id, record);
        Ok(())
    }

    fn remove(&mut self, id: &ImageId) -> Result<()> {
        let in_overlay = self.overlay.shift_remove(id).is_some();
        let in_table = self.table.shift_remove(&id.to_string()).is_some();
        if !in_overlay && !in_table {
            exn::bail!(ErrorKind::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn keys(&self) -> Vec<ImageId> {
        let mut keys: Vec<ImageId> = self.table.values().map(|entry| entry.id.clone()).collect();
        keys.extend(
            self.overlay
                .keys()
                .filter(|id| !self.table.contains_key(&id.to_string()))
                .cloned(),
        );
        keys
    }

    fn len(&self) -> usize {
        self.keys().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(parts: &[&str], site: Option<&str>) -> ImageId {
        ImageId::new(parts.iter().copied(), site).unwrap()
    }

    fn record(urlpath: &str) -> ImageRecord {
        let mut record = ImageRecord::new(urlpath);
        record.width = Some(100);
        record.height = Some(200);
        record
    }

    #[test]
    fn insert_get_remove() {
        let mut provider = ImageProvider::new(Some("prov-1".to_owned()));
        let key = id(&["b.svs"], Some("mercy"));
        provider.insert(key.clone(), record("/data/b.svs")).unwrap();

        assert!(provider.contains(&key));
        assert_eq!(provider.get(&key).unwrap().map(|r| r.urlpath.as_str()), Some("/data/b.svs"));
        assert_eq!(provider.len(), 1);

        provider.remove(&key).unwrap();
        assert!(provider.is_empty());
        let err = provider.remove(&key).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn invalid_record_rejected_on_insert() {
        let mut provider = ImageProvider::new(None);
        let mut bad = record("/data/b.svs");
        bad.width = Some(0);
        let err = provider.insert(id(&["b.svs"], None), bad).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn persist_flattens_overlay_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.arrow");

        let mut provider = ImageProvider::new(Some("prov-1".to_owned()));
        provider.insert(id(&["b.svs"], Some("mercy")), record("/data/b.svs")).unwrap();
        provider.insert(id(&["c.svs"], Some("mercy")), record("/data/c.svs")).unwrap();
        provider.persist(&path).unwrap();
        assert!(provider.overlay.is_empty());
        assert_eq!(provider.table.len(), 2);

        let mut reloaded = ImageProvider::load(&path).unwrap();
        assert_eq!(reloaded.identifier(), "prov-1");
        assert_eq!(reloaded.len(), 2);
        let key = id(&["b.svs"], Some("mercy"));
        assert_eq!(reloaded.get(&key).unwrap().map(|r| r.urlpath.as_str()), Some("/data/b.svs"));
    }

    #[test]
    fn table_hits_are_cached_in_the_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.arrow");

        let mut provider = ImageProvider::new(None);
        let key = id(&["b.svs"], Some("mercy"));
        provider.insert(key.clone(), record("/data/b.svs")).unwrap();
        provider.persist(&path).unwrap();

        let mut reloaded = ImageProvider::load(&path).unwrap();
        assert!(reloaded.overlay.is_empty());
        reloaded.get(&key).unwrap();
        assert_eq!(reloaded.overlay.len(), 1);
    }

    #[test]
    fn overlay_shadows_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.arrow");

        let mut provider = ImageProvider::new(None);
        let key = id(&["b.svs"], Some("mercy"));
        provider.insert(key.clone(), record("/data/old.svs")).unwrap();
        provider.persist(&path).unwrap();

        provider.insert(key.clone(), record("/data/new.svs")).unwrap();
        assert_eq!(provider.get(&key).unwrap().map(|r| r.urlpath.as_str()), Some("/data/new.svs"));
        assert_eq!(provider.len(), 1);
    }

    #[test]
    fn table_lookups_use_the_exact_canonical_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.arrow");

        let mut provider = ImageProvider::new(None);
        provider.insert(id(&["b.svs"], Some("mercy")), record("/data/b.svs")).unwrap();
        provider.persist(&path).unwrap();

        // equal under id comparison rules, but a different canonical string
        let mut reloaded = ImageProvider::load(&path).unwrap();
        let untagged = id(&["b.svs"], None);
        assert_eq!(reloaded.get(&untagged).unwrap(), None);
        assert!(!reloaded.contains(&untagged));
    }

    #[test]
    fn extra_metadata_keys_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.arrow");

        let batch = image::to_batch(std::iter::empty()).unwrap();
        let user = BTreeMap::from([("surprise".to_owned(), Value::from(1u64))]);
        Store::<ImageStoreKind>::new().write(&batch, &path, "prov-1", &user).unwrap();

        let err = ImageProvider::load(&path).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
    }

    #[test]
    fn missing_provider_version_fails_the_load() {
        struct BareImage;
        impl StoreKind for BareImage {
            const STORE_TYPE: StoreType = StoreType::Image;
            const VERSION: u64 = 1;
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.arrow");
        let batch = image::to_batch(std::iter::empty()).unwrap();
        Store::<BareImage>::new().write(&batch, &path, "prov-1", &BTreeMap::new()).unwrap();

        let err = ImageProvider::load(&path).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Store));
    }

    #[test]
    fn annotations_are_stamped_on_insert() {
        let mut provider = AnnotationProvider::new(None);
        let key = id(&["b.svs"], Some("mercy"));
        provider.insert(key.clone(), Annotations::new(vec![AnnotationEntry::new("POINT (1 2)")])).unwrap();

        let stored = provider.get(&key).unwrap().unwrap();
        assert_eq!(stored.image_id.as_ref(), Some(&key));
    }

    #[test]
    fn mismatched_annotation_id_rejected() {
        let mut provider = AnnotationProvider::new(None);
        let key = id(&["b.svs"], Some("mercy"));
        let other = id(&["c.svs"], Some("mercy"));
        let err = provider
            .insert(key, Annotations::for_image(other, vec![AnnotationEntry::new("POINT (1 2)")]))
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn annotation_roundtrip_materializes_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.arrow");

        let mut provider = AnnotationProvider::new(Some("prov-a".to_owned()));
        let key = id(&["b.svs"], Some("mercy"));
        let entries = vec![
            AnnotationEntry::new("POLYGON ((0 0, 1 0, 1 1))"),
            AnnotationEntry::new("POINT (4 5)"),
        ];
        provider.insert(key.clone(), Annotations::new(entries.clone())).unwrap();
        provider.persist(&path).unwrap();

        let mut reloaded = AnnotationProvider::load(&path).unwrap();
        assert!(reloaded.overlay.is_empty());
        let stored = reloaded.get(&key).unwrap().unwrap();
        assert_eq!(stored.entries, entries);
        assert_eq!(stored.image_id.as_ref(), Some(&key));
        assert_eq!(reloaded.overlay.len(), 1);
    }
}
