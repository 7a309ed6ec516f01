//! # Wad
//!
//! The storage core of a small version-control tool: a content-addressed
//! store of typed objects (topics, commits and tree entries), a staging
//! protocol for building objects before they are sealed into the store, and
//! a diff between the working directory and the last recorded tree.

mod hex;

/// Decoded commits and entries, cached by reference.
pub mod arena;
/// Attribute encodings and values.
pub mod attribute;
/// Immutable snapshots and walking their history.
pub mod commit;
/// Per-repository settings.
pub mod config;
/// Hash of a file's bytes, used to spot modified files.
pub mod content_hash;
/// Working directory versus recorded tree.
pub mod diff;
/// File and directory nodes of a snapshot tree.
pub mod entry;
/// The crate error type and its usage-error subset.
pub mod error;
/// The table of object kinds and their schemas.
pub mod kind;
/// Staging, publishing and looking up typed objects.
pub mod object_store;
/// `<kind>/<id>` pointers between objects.
pub mod reference;
/// A working directory with its `.wad` store and head pointer.
pub mod repository;
/// Named, movable pointers to commits.
pub mod topic;

pub use error::{Error, Result, UsageError};
pub use reference::Reference;
pub use repository::Repository;
