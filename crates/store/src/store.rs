//! Versioned envelope around a persisted columnar table.
//!
//! A store file is an Arrow IPC file whose schema-level metadata carries a
//! namespaced envelope: `slidemap.<type>.arrow.<key>` entries with
//! JSON-encoded values. Reading checks the store type and the format version
//! in both directions before any rows are interpreted; an older file must be
//! migrated, a newer file needs newer software. Schema metadata written by
//! other tools is carried along untouched.

use crate::error::{ErrorKind, Result};
use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::Schema;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const KEY_IDENTIFIER: &str = "identifier";
pub const KEY_STORE_TYPE: &str = "store_type";
pub const KEY_STORE_VERSION: &str = "store_version";
pub const KEY_SOFTWARE_VERSION: &str = "slidemap_version";
pub const KEY_CREATED_AT: &str = "created_at";
pub const KEY_CREATED_BY: &str = "created_by";
pub const KEY_USER_METADATA: &str = "user_metadata";

/// Which kind of table a store file holds.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    #[display("image")]
    Image,
    #[display("annotation")]
    Annotation,
}

/// A concrete store format: its type tag, its version, and any extra
/// envelope keys it owns.
pub trait StoreKind {
    const STORE_TYPE: StoreType;
    const VERSION: u64;

    /// Stamp additional envelope keys before writing.
    fn metadata_set_hook(metadata: &mut BTreeMap<String, Value>) {
        let _ = metadata;
    }

    /// Validate additional envelope keys after reading, returning the
    /// entries to surface to the caller.
    fn metadata_get_hook(metadata: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>> {
        let _ = metadata;
        Ok(BTreeMap::new())
    }
}

/// Result of reading a store file.
#[derive(Debug)]
pub struct Envelope {
    pub batch: RecordBatch,
    pub identifier: String,
    /// User metadata merged with the envelope's version keys and anything
    /// the kind's get hook surfaced.
    pub metadata: BTreeMap<String, Value>,
}

/// Writer/reader for one store kind.
pub struct Store<K: StoreKind> {
    _kind: PhantomData<K>,
}

impl<K: StoreKind> Default for Store<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreKind> Store<K> {
    pub fn new() -> Self {
        Self { _kind: PhantomData }
    }

    fn prefixed(key: &str) -> String {
        format!("slidemap.{}.arrow.{key}", K::STORE_TYPE)
    }

    /// Write `batch` to `path` wrapped in the envelope.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn write(
        &self,
        batch: &RecordBatch,
        path: &Path,
        identifier: &str,
        user_metadata: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let mut envelope: BTreeMap<String, Value> = BTreeMap::new();
        envelope.insert(KEY_IDENTIFIER.to_owned(), Value::from(identifier));
        envelope.insert(KEY_STORE_TYPE.to_owned(), Value::from(K::STORE_TYPE.to_string()));
        envelope.insert(KEY_STORE_VERSION.to_owned(), Value::from(K::VERSION));
        envelope.insert(KEY_SOFTWARE_VERSION.to_owned(), Value::from(env!("CARGO_PKG_VERSION")));
        envelope.insert(KEY_CREATED_AT.to_owned(), Value::from(created_at()?));
        envelope.insert(KEY_CREATED_BY.to_owned(), Value::from(created_by()));
        if !user_metadata.is_empty() {
            let entries: serde_json::Map<String, Value> =
                user_metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            envelope.insert(KEY_USER_METADATA.to_owned(), Value::Object(entries));
        }
        K::metadata_set_hook(&mut envelope);

        let mut schema_metadata = batch.schema().metadata().clone();
        for (key, value) in &envelope {
            schema_metadata.insert(Self::prefixed(key), value.to_string());
        }
        let schema =
            Arc::new(Schema::new_with_metadata(batch.schema().fields().clone(), schema_metadata));
        let batch = RecordBatch::try_new(Arc::clone(&schema), batch.columns().to_vec())
            .or_raise(|| ErrorKind::Format("table does not match its own schema".to_owned()))?;

        let file = File::create(path).or_raise(|| ErrorKind::Io)?;
        let mut writer = FileWriter::try_new(file, &schema).or_raise(|| ErrorKind::Io)?;
        writer.write(&batch).or_raise(|| ErrorKind::Io)?;
        writer.finish().or_raise(|| ErrorKind::Io)?;
        tracing::debug!(rows = batch.num_rows(), identifier, "wrote store file");
        Ok(())
    }

    /// Read a store file, validating type and version before returning rows.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn read(&self, path: &Path) -> Result<Envelope> {
        let file = File::open(path).or_raise(|| ErrorKind::Io)?;
        let reader = FileReader::try_new(file, None)
            .or_raise(|| ErrorKind::Format("not an arrow ipc file".to_owned()))?;
        let schema = reader.schema();
        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .or_raise(|| ErrorKind::Format("corrupt record batches".to_owned()))?;
        let batch = concat_batches(&schema, batches.iter())
            .or_raise(|| ErrorKind::Format("record batches do not share a schema".to_owned()))?;

        let prefix = Self::prefixed("");
        let mut raw: BTreeMap<String, Value> = BTreeMap::new();
        for (key, encoded) in schema.metadata() {
            let Some(stripped) = key.strip_prefix(&prefix) else { continue };
            let value = serde_json::from_str(encoded).or_raise(|| {
                ErrorKind::Format(format!("metadata key {stripped:?} is not valid json"))
            })?;
            raw.insert(stripped.to_owned(), value);
        }

        let store_type = required_str(&raw, KEY_STORE_TYPE)?;
        if store_type != K::STORE_TYPE.to_string() {
            exn::bail!(ErrorKind::Format(format!(
                "expected a {} store, found {store_type:?}",
                K::STORE_TYPE
            )));
        }
        let found = raw
            .get(KEY_STORE_VERSION)
            .and_then(Value::as_u64)
            .ok_or_raise(|| ErrorKind::Format(format!("missing metadata key {KEY_STORE_VERSION:?}")))?;
        if found < K::VERSION {
            exn::bail!(ErrorKind::VersionTooOld { found, expected: K::VERSION });
        }
        if found > K::VERSION {
            exn::bail!(ErrorKind::VersionTooNew { found, expected: K::VERSION });
        }
        let identifier = required_str(&raw, KEY_IDENTIFIER)?.to_owned();

        let hook_data = K::metadata_get_hook(&raw)?;

        // user metadata first, then envelope keys, so reserved names always
        // reflect what the envelope actually recorded
        let mut metadata = BTreeMap::new();
        match raw.remove(KEY_USER_METADATA) {
            None => {}
            Some(Value::Object(entries)) => metadata.extend(entries),
            Some(_) => exn::bail!(ErrorKind::Format("user metadata is not an object".to_owned())),
        }
        raw.remove(KEY_IDENTIFIER);
        metadata.extend(raw);
        metadata.extend(hook_data);

        tracing::debug!(rows = batch.num_rows(), identifier, "read store file");
        Ok(Envelope { batch, identifier, metadata })
    }
}

fn required_str<'a>(metadata: &'a BTreeMap<String, Value>, key: &str) -> Result<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .ok_or_raise(|| ErrorKind::Format(format!("missing metadata key {key:?}")))
}

fn created_at() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .or_raise(|| ErrorKind::Format("could not format creation timestamp".to_owned()))
}

fn created_by() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_owned())
}
