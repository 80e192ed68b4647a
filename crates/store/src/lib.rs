//! Versioned envelope around persisted columnar tables.
//!
//! Store files are Arrow IPC files carrying a namespaced metadata envelope.
//! Type and version are validated in both directions on read.

pub mod error;
mod store;

pub use crate::store::{
    Envelope, KEY_CREATED_AT, KEY_CREATED_BY, KEY_IDENTIFIER, KEY_SOFTWARE_VERSION, KEY_STORE_TYPE,
    KEY_STORE_VERSION, KEY_USER_METADATA, Store, StoreKind, StoreType,
};
