//! Virtual namespace over archive entries.
//!
//! A tree of [`Node`]s hangs off an archive root. Every branch owns its
//! children through a change-notifying [`NodeCollection`], which also keeps
//! parent links, derived paths and aggregates consistent.

pub mod build;
pub mod collection;
pub mod content;
pub mod filter;
mod insert;
pub mod node;
pub mod search;
pub mod sort;
pub mod view;

pub use build::{
    build_archive_root, expand_containers, ArchiveEntry, ArchiveSource, ContainerFactory,
    NoProgress, ProgressSink, SubStream, SubStreamSource,
};
pub use content::{accessor, ContentAccessor, ContentHandle, ReadSeek};
pub use node::Node;
pub use sort::SortBy;
