//! tablewright-store — object access for the tablewright controller.
//!
//! The controller never talks to the API server directly. Every read and
//! write goes through a [`ResourceStore`], which is injected into each
//! component as an `Arc<dyn ResourceStore>`.
//!
//! # Backends
//!
//! - [`KubeStore`] — a live cluster, via `kube::Api`
//! - [`MemoryStore`] — an in-memory object map with resource versions and
//!   failure injection, for tests
//!
//! Both backends share the same contract: `get_*` returns `Ok(None)` for a
//! missing object, `create_*` fails with [`StoreError::AlreadyExists`],
//! `delete_*` fails with [`StoreError::NotFound`], and
//! `update_table_status` fails with [`StoreError::Conflict`] when the
//! caller's copy is stale.

pub mod error;
pub mod kube_store;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use kube_store::KubeStore;
pub use memory::{MemoryStore, Operation};
pub use store::{LogStream, ObjectKey, ResourceStore};
