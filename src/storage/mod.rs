//! Object storage backends.

pub mod memory;
pub mod s3;
mod traits;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;
pub use traits::{
    CompletedObject, ObjectInfo, ObjectStore, PartStream, StorageError, UploadedPart,
};
