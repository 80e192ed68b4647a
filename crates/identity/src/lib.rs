//! Image identity for whole-slide datasets.
//!
//! [`ImageId`] names an image by its path segments with an optional site
//! tag, round-trips through a canonical string and a JSON form, and
//! resolves partial queries leaf-first via [`match_partial_reversed`].

pub mod error;
mod id;
pub mod mapper;
pub mod matcher;
mod parse;

pub use crate::id::{ImageId, id_from_parts, id_from_parts_without_extension};
pub use crate::mapper::{FilenameMapper, MapperRegistry, PathMapper};
pub use crate::matcher::{MatchOutcome, TrailingComponents, match_partial_reversed, resolve_partial};
