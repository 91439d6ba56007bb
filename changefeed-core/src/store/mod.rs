mod errors;
pub use errors::{Result, StoreError};

mod document_store;
pub use document_store::{DocumentStore, DocumentStream, RequestOptions, VersionedDocument};

mod memory_store;
pub use memory_store::MemoryStore;

#[cfg(test)]
mod memory_store_test;
