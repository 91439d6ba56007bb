//! # Change Feed Lease Store
//!
//! Lease persistence for the change feed processor: CRUD, optimistic concurrency
//! on the document etag, and the TTL-bound lock used to bootstrap the store once
//! per deployment.

mod errors;
pub use errors::{LeaseStoreError, Result};

mod traits;
pub use traits::{
    LeaseCheckpointer, LeaseContainer, LeaseManager, LeaseStore, LeaseStoreManager, LeaseStream,
};

mod request_options;
pub use request_options::{
    PartitionedByIdRequestOptionsFactory, RequestOptionsFactory,
    SinglePartitionRequestOptionsFactory,
};

mod document_lease_store;
pub use document_lease_store::{DocumentLeaseStoreManager, LeaseStoreManagerSettings};
