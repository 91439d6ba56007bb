//! # Change Feed Core
//!
//! Shared types and collaborator contracts for the change feed processor.
//!
//! - [`Lease`]: the persisted record binding one partition key range to one owning host
//! - [`store`]: the versioned document store the lease documents live in, with an
//!   in-memory backend
//! - [`feed`]: the change feed client used to enumerate partition key ranges and read
//!   pages of changes, with an in-memory backend

pub mod feed;
pub mod lease;
pub mod store;
pub mod utils;

pub use lease::Lease;
