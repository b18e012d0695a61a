//! Storage abstraction layer.
//!
//! Every filesystem call made on behalf of a request goes through the
//! [`Storage`] trait so operations can be exercised against instrumented or
//! in-memory implementations. [`LocalStorage`] is the disk-backed
//! implementation used by the server.

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{DirEntry, EntryMetadata, Storage, StorageReader, is_missing};
