#![forbid(unsafe_code)]

//! Reference implementations of the blob store, metadata store, and
//! Artifact Store Adapter collaborators. The core orchestration logic in
//! `reelcut-engine` depends only on the traits here; these
//! in-memory/filesystem implementations exist so the workspace is
//! independently runnable and testable.

pub mod artifact_store;
pub mod blob;
pub mod metadata;

pub use artifact_store::{ArtifactStoreAdapter, ArtifactStoreError};
pub use blob::{BlobError, BlobStore, FilesystemBlobStore};
pub use metadata::{InMemoryMetadataStore, MetadataStore};
