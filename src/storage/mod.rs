//! Persistence
//!
//! - `JsonDocumentStore`: the snapshot and shift-summary documents
//! - `ArchiveSink`: sample rows and archived shifts (sled or in-memory)

pub mod archive;
pub mod json_store;

pub use archive::{ArchiveError, ArchiveSink, InMemoryArchive, SledArchive};
pub use json_store::{DocumentSource, JsonDocumentStore, StoreError};
