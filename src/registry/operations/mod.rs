//! Registry operations grouped by the resource they act on
//!
//! Each group shares the [`RegistryClient`](crate::registry::client::RegistryClient)
//! request pipeline; the [`Registry`](crate::registry::Registry) facade
//! composes them into the public API.

pub mod blob_operations;
pub mod manifest_operations;
pub mod repository_operations;

pub use blob_operations::{Blob, BlobOperations};
pub use manifest_operations::{LookupMethod, ManifestHead, ManifestOperations};
pub use repository_operations::{RepositoryOperations, TagPage, TagQuery};
