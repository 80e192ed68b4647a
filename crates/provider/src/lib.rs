//! Identity-addressed access to whole-slide image datasets.
//!
//! Providers map [`ImageId`]s to records: file-level facts for images,
//! grouped entries for annotations. A provider is an in-memory overlay on
//! top of a persisted columnar table; reads fall through to the table and
//! cache, writes land in the overlay, and [`ImageProvider::persist`] (or the
//! annotation equivalent) flattens everything back to one store file.

pub mod error;

mod annotations;
mod composite;
mod create;
mod image;
mod provider;
mod relocate;
mod scan;
mod settings;

pub use annotations::{AnnotationEntry, Annotations};
pub use composite::{FilteredProvider, GroupedProvider};
pub use create::{
    CreateOptions, create_annotation_provider, create_image_provider, image_id_from_found,
    image_record_from_found,
};
pub use image::{FileStat, ImageRecord};
pub use provider::{
    AnnotationProvider, ImageId, ImageProvider, KEY_PROVIDER_VERSION, PROVIDER_VERSION, Provider,
};
pub use relocate::{RelocateOptions, reassociate_paths};
pub use scan::{FoundFile, find_files};
pub use settings::Settings;
