//! Image records and their columnar form.
//!
//! An [`ImageRecord`] holds everything the dataset knows about one slide
//! without opening it: where it lives, which backend read it, geometry and
//! resolution, and file-level facts. Pixel access itself is out of scope
//! here; records are metadata only.

use crate::error::{ErrorKind, Result};
use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, Int64Array, Int64Builder, ListArray,
    ListBuilder, RecordBatch, StringArray, StringBuilder, UInt32Array, UInt32Builder, UInt64Array,
    UInt64Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use exn::{OptionExt, ResultExt};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

/// Metadata for a single whole-slide image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Where the image file lives.
    pub urlpath: String,
    /// Backend that produced the metadata, with its version.
    pub backend: Option<String>,
    pub backend_version: Option<String>,
    /// Level-zero pixel dimensions.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Microns per pixel at level zero.
    pub mpp_x: Option<f64>,
    pub mpp_y: Option<f64>,
    /// Downsample factor per pyramid level.
    pub downsamples: Vec<f64>,
    pub vendor: Option<String>,
    pub comment: Option<String>,
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    /// Unix timestamp of the file's last modification.
    pub modified_at: Option<i64>,
}

impl ImageRecord {
    pub fn new(urlpath: impl Into<String>) -> Self {
        Self {
            urlpath: urlpath.into(),
            backend: None,
            backend_version: None,
            width: None,
            height: None,
            mpp_x: None,
            mpp_y: None,
            downsamples: Vec::new(),
            vendor: None,
            comment: None,
            size_bytes: None,
            checksum: None,
            modified_at: None,
        }
    }

    /// A record built from file-level facts alone.
    pub fn from_file(path: &Path, checksum: bool) -> Result<Self> {
        let stat = FileStat::read(path, checksum)?;
        let mut record = Self::new(path.display().to_string());
        record.size_bytes = Some(stat.size_bytes);
        record.modified_at = stat.modified_at;
        record.checksum = stat.checksum;
        Ok(record)
    }

    /// Check the numeric invariants: dimensions are non-zero, resolutions
    /// and downsamples are finite and positive.
    pub fn validate(&self) -> Result<()> {
        if self.urlpath.is_empty() {
            exn::bail!(ErrorKind::InvalidArgument("urlpath must not be empty".to_owned()));
        }
        if self.width == Some(0) || self.height == Some(0) {
            exn::bail!(ErrorKind::InvalidArgument("image dimensions must be non-zero".to_owned()));
        }
        for mpp in [self.mpp_x, self.mpp_y].into_iter().flatten() {
            if !mpp.is_finite() || mpp <= 0.0 {
                exn::bail!(ErrorKind::InvalidArgument(format!("mpp must be positive, got {mpp}")));
            }
        }
        for ds in &self.downsamples {
            if !ds.is_finite() || *ds <= 0.0 {
                exn::bail!(ErrorKind::InvalidArgument(format!(
                    "downsample factors must be positive, got {ds}"
                )));
            }
        }
        Ok(())
    }
}

/// File-level facts gathered without interpreting the image contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size_bytes: u64,
    pub modified_at: Option<i64>,
    pub checksum: Option<String>,
}

impl FileStat {
    /// Stat `path`, optionally hashing its contents with BLAKE3.
    pub fn read(path: &Path, checksum: bool) -> Result<Self> {
        let metadata = std::fs::metadata(path).or_raise(|| ErrorKind::Scan)?;
        let modified_at = metadata
            .modified()
            .ok()
            .map(|t| OffsetDateTime::from(t).unix_timestamp());
        let checksum = if checksum {
            let mut hasher = blake3::Hasher::new();
            let mut file = File::open(path).or_raise(|| ErrorKind::Scan)?;
            io::copy(&mut file, &mut hasher).or_raise(|| ErrorKind::Scan)?;
            Some(hasher.finalize().to_string())
        } else {
            None
        };
        Ok(Self { size_bytes: metadata.len(), modified_at, checksum })
    }
}

const COLUMNS: [&str; 14] = [
    "image_id",
    "urlpath",
    "backend",
    "backend_version",
    "width",
    "height",
    "mpp_x",
    "mpp_y",
    "downsamples",
    "vendor",
    "comment",
    "size_bytes",
    "checksum",
    "modified_at",
];

pub(crate) fn image_schema() -> Schema {
    Schema::new(vec![
        Field::new("image_id", DataType::Utf8, false),
        Field::new("urlpath", DataType::Utf8, false),
        Field::new("backend", DataType::Utf8, true),
        Field::new("backend_version", DataType::Utf8, true),
        Field::new("width", DataType::UInt32, true),
        Field::new("height", DataType::UInt32, true),
        Field::new("mpp_x", DataType::Float64, true),
        Field::new("mpp_y", DataType::Float64, true),
        Field::new(
            "downsamples",
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        ),
        Field::new("vendor", DataType::Utf8, true),
        Field::new("comment", DataType::Utf8, true),
        Field::new("size_bytes", DataType::UInt64, true),
        Field::new("checksum", DataType::Utf8, true),
        Field::new("modified_at", DataType::Int64, true),
    ])
}

/// Encode index strings and records as one batch, index column first.
pub(crate) fn to_batch<'a>(
    rows: impl Iterator<Item = (&'a str, &'a ImageRecord)>,
) -> Result<RecordBatch> {
    let mut image_id = StringBuilder::new();
    let mut urlpath = StringBuilder::new();
    let mut backend = StringBuilder::new();
    let mut backend_version = StringBuilder::new();
    let mut width = UInt32Builder::new();
    let mut height = UInt32Builder::new();
    let mut mpp_x = Float64Builder::new();
    let mut mpp_y = Float64Builder::new();
    let mut downsamples = ListBuilder::new(Float64Builder::new());
    let mut vendor = StringBuilder::new();
    let mut comment = StringBuilder::new();
    let mut size_bytes = UInt64Builder::new();
    let mut checksum = StringBuilder::new();
    let mut modified_at = Int64Builder::new();

    for (id, record) in rows {
        record.validate()?;
        image_id.append_value(id);
        urlpath.append_value(&record.urlpath);
        backend.append_option(record.backend.as_deref());
        backend_version.append_option(record.backend_version.as_deref());
        width.append_option(record.width);
        height.append_option(record.height);
        mpp_x.append_option(record.mpp_x);
        mpp_y.append_option(record.mpp_y);
        for ds in &record.downsamples {
            downsamples.values().append_value(*ds);
        }
        downsamples.append(true);
        vendor.append_option(record.vendor.as_deref());
        comment.append_option(record.comment.as_deref());
        size_bytes.append_option(record.size_bytes);
        checksum.append_option(record.checksum.as_deref());
        modified_at.append_option(record.modified_at);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(image_id.finish()),
        Arc::new(urlpath.finish()),
        Arc::new(backend.finish()),
        Arc::new(backend_version.finish()),
        Arc::new(width.finish()),
        Arc::new(height.finish()),
        Arc::new(mpp_x.finish()),
        Arc::new(mpp_y.finish()),
        Arc::new(downsamples.finish()),
        Arc::new(vendor.finish()),
        Arc::new(comment.finish()),
        Arc::new(size_bytes.finish()),
        Arc::new(checksum.finish()),
        Arc::new(modified_at.finish()),
    ];
    RecordBatch::try_new(Arc::new(image_schema()), columns)
        .or_raise(|| ErrorKind::Format("image rows do not fit the table schema".to_owned()))
}

/// Decode a batch back into index strings and records.
///
/// The column set must match exactly; a table with extra or missing columns
/// was not written by this software and is rejected rather than guessed at.
pub(crate) fn from_batch(batch: &RecordBatch) -> Result<Vec<(String, ImageRecord)>> {
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    if names != COLUMNS {
        exn::bail!(ErrorKind::Format(format!("unexpected image table columns: {names:?}")));
    }

    let image_id = column::<StringArray>(batch, "image_id")?;
    let urlpath = column::<StringArray>(batch, "urlpath")?;
    let backend = column::<StringArray>(batch, "backend")?;
    let backend_version = column::<StringArray>(batch, "backend_version")?;
    let width = column::<UInt32Array>(batch, "width")?;
    let height = column::<UInt32Array>(batch, "height")?;
    let mpp_x = column::<Float64Array>(batch, "mpp_x")?;
    let mpp_y = column::<Float64Array>(batch, "mpp_y")?;
    let downsamples = column::<ListArray>(batch, "downsamples")?;
    let vendor = column::<StringArray>(batch, "vendor")?;
    let comment = column::<StringArray>(batch, "comment")?;
    let size_bytes = column::<UInt64Array>(batch, "size_bytes")?;
    let checksum = column::<StringArray>(batch, "checksum")?;
    let modified_at = column::<Int64Array>(batch, "modified_at")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let levels = downsamples.value(i);
        let levels = levels
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_raise(|| ErrorKind::Format("downsamples items are not floats".to_owned()))?;
        let record = ImageRecord {
            urlpath: urlpath.value(i).to_owned(),
            backend: opt_str(backend, i),
            backend_version: opt_str(backend_version, i),
            width: (!width.is_null(i)).then(|| width.value(i)),
            height: (!height.is_null(i)).then(|| height.value(i)),
            mpp_x: (!mpp_x.is_null(i)).then(|| mpp_x.value(i)),
            mpp_y: (!mpp_y.is_null(i)).then(|| mpp_y.value(i)),
            downsamples: levels.iter().flatten().collect(),
            vendor: opt_str(vendor, i),
            comment: opt_str(comment, i),
            size_bytes: (!size_bytes.is_null(i)).then(|| size_bytes.value(i)),
            checksum: opt_str(checksum, i),
            modified_at: (!modified_at.is_null(i)).then(|| modified_at.value(i)),
        };
        rows.push((image_id.value(i).to_owned(), record));
    }
    Ok(rows)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_raise(|| ErrorKind::Format(format!("column {name:?} has the wrong type")))
}

fn opt_str(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn sample() -> ImageRecord {
        let mut record = ImageRecord::new("/data/scans/b.svs");
        record.backend = Some("openslide".to_owned());
        record.backend_version = Some("4.0.0".to_owned());
        record.width = Some(81920);
        record.height = Some(61440);
        record.mpp_x = Some(0.25);
        record.mpp_y = Some(0.25);
        record.downsamples = vec![1.0, 4.0, 16.0];
        record.vendor = Some("aperio".to_owned());
        record.size_bytes = Some(123_456);
        record
    }

    #[test]
    fn batch_roundtrip() {
        let a = sample();
        let mut b = ImageRecord::new("/data/scans/c.svs");
        b.comment = Some("macro image missing".to_owned());

        let rows = vec![("ImageId('b.svs')".to_owned(), a), ("ImageId('c.svs')".to_owned(), b)];
        let batch = to_batch(rows.iter().map(|(k, v)| (k.as_str(), v))).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let decoded = from_batch(&batch).unwrap();
        assert_eq!(decoded, rows);
    }

    #[rstest]
    #[case(|r: &mut ImageRecord| r.width = Some(0))]
    #[case(|r: &mut ImageRecord| r.mpp_x = Some(-0.25))]
    #[case(|r: &mut ImageRecord| r.mpp_y = Some(f64::NAN))]
    #[case(|r: &mut ImageRecord| r.downsamples = vec![1.0, 0.0])]
    #[case(|r: &mut ImageRecord| r.urlpath = String::new())]
    fn invalid_records_rejected(#[case] mutate: fn(&mut ImageRecord)) {
        let mut record = sample();
        mutate(&mut record);
        let err = record.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn unexpected_columns_rejected() {
        let schema = Schema::new(vec![Field::new("image_id", DataType::Utf8, false)]);
        let columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec!["a"]))];
        let batch = RecordBatch::try_new(Arc::new(schema), columns).unwrap();
        let err = from_batch(&batch).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Format(_)));
    }

    #[test]
    fn file_stat_reads_size_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.svs");
        File::create(&path).unwrap().write_all(b"fake slide bytes").unwrap();

        let with_hash = FileStat::read(&path, true).unwrap();
        assert_eq!(with_hash.size_bytes, 16);
        assert_eq!(with_hash.checksum.as_deref(), Some(&*blake3::hash(b"fake slide bytes").to_string()));

        let without_hash = FileStat::read(&path, false).unwrap();
        assert_eq!(without_hash.checksum, None);
    }

    #[test]
    fn missing_file_is_a_scan_error() {
        let err = FileStat::read(Path::new("/definitely/not/here.svs"), false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Scan));
    }
}
