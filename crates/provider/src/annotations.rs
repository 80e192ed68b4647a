//! Annotation records and their columnar form.
//!
//! One [`Annotations`] value collects every annotation drawn on a single
//! image. The persisted table stores one row per annotation entry, with the
//! image id repeated in the index column, so a slide's annotations decode
//! back into one ordered group.

use crate::error::{ErrorKind, Result};
use arrow::array::{Array, ArrayRef, RecordBatch, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use exn::{OptionExt, ResultExt};
use indexmap::IndexMap;
use slidemap_identity::ImageId;
use std::sync::Arc;

/// A single annotated region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationEntry {
    /// Geometry in well-known text.
    pub geometry: String,
    pub classification: Option<String>,
    pub color: Option<String>,
    pub annotator: Option<String>,
}

impl AnnotationEntry {
    pub fn new(geometry: impl Into<String>) -> Self {
        Self { geometry: geometry.into(), classification: None, color: None, annotator: None }
    }
}

/// All annotations for one image.
///
/// `image_id` may start out unset; the provider stamps it on insert and
/// rejects a mismatch between the declared id and the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotations {
    pub image_id: Option<ImageId>,
    pub entries: Vec<AnnotationEntry>,
}

impl Annotations {
    pub fn new(entries: Vec<AnnotationEntry>) -> Self {
        Self { image_id: None, entries }
    }

    pub fn for_image(image_id: ImageId, entries: Vec<AnnotationEntry>) -> Self {
        Self { image_id: Some(image_id), entries }
    }
}

const COLUMNS: [&str; 5] = ["image_id", "geometry", "classification", "color", "annotator"];

pub(crate) fn annotation_schema() -> Schema {
    Schema::new(vec![
        Field::new("image_id", DataType::Utf8, false),
        Field::new("geometry", DataType::Utf8, false),
        Field::new("classification", DataType::Utf8, true),
        Field::new("color", DataType::Utf8, true),
        Field::new("annotator", DataType::Utf8, true),
    ])
}

/// Encode per-image entry lists as a flat batch, one row per entry.
pub(crate) fn to_batch<'a>(
    rows: impl Iterator<Item = (&'a str, &'a [AnnotationEntry])>,
) -> Result<RecordBatch> {
    let mut image_id = StringBuilder::new();
    let mut geometry = StringBuilder::new();
    let mut classification = StringBuilder::new();
    let mut color = StringBuilder::new();
    let mut annotator = StringBuilder::new();

    for (id, entries) in rows {
        for entry in entries {
            if entry.geometry.is_empty() {
                exn::bail!(ErrorKind::InvalidArgument("annotation geometry must not be empty".to_owned()));
            }
            image_id.append_value(id);
            geometry.append_value(&entry.geometry);
            classification.append_option(entry.classification.as_deref());
            color.append_option(entry.color.as_deref());
            annotator.append_option(entry.annotator.as_deref());
        }
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(image_id.finish()),
        Arc::new(geometry.finish()),
        Arc::new(classification.finish()),
        Arc::new(color.finish()),
        Arc::new(annotator.finish()),
    ];
    RecordBatch::try_new(Arc::new(annotation_schema()), columns)
        .or_raise(|| ErrorKind::Format("annotation rows do not fit the table schema".to_owned()))
}

/// Decode a batch back into per-image entry lists, preserving row order
/// within each image and first-appearance order across images.
pub(crate) fn from_batch(batch: &RecordBatch) -> Result<IndexMap<String, Vec<AnnotationEntry>>> {
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    if names != COLUMNS {
        exn::bail!(ErrorKind::Format(format!("unexpected annotation table columns: {names:?}")));
    }

    let image_id = column(batch, "image_id")?;
    let geometry = column(batch, "geometry")?;
    let classification = column(batch, "classification")?;
    let color = column(batch, "color")?;
    let annotator = column(batch, "annotator")?;

    let mut rows: IndexMap<String, Vec<AnnotationEntry>> = IndexMap::new();
    for i in 0..batch.num_rows() {
        let entry = AnnotationEntry {
            geometry: geometry.value(i).to_owned(),
            classification: opt_str(classification, i),
            color: opt_str(color, i),
            annotator: opt_str(annotator, i),
        };
        rows.entry(image_id.value(i).to_owned()).or_default().push(entry);
    }
    Ok(rows)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_raise(|| ErrorKind::Format(format!("column {name:?} has the wrong type")))
}

fn opt_str(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_owned())
}
