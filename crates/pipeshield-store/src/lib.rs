//! Decision store backends.
//!
//! The gate state lives in a single shared record that the reconciler writes
//! and every webhook replica reads. This crate defines the [`DecisionStore`]
//! trait plus two backends: the Kubernetes ConfigMap store used in real
//! deployments and an in-memory store for tests and local runs.

mod configmap;
mod memory;
mod traits;

pub use configmap::ConfigMapStore;
pub use memory::MemoryStore;
pub use traits::{DecisionStore, StoreError, StoreResult};
