//! Decision store trait and errors.

use async_trait::async_trait;
use pipeshield_core::StoredGate;
use thiserror::Error;

/// Decision store operation errors.
///
/// Note that a missing record is not an error: `read` reports it as
/// [`StoredGate::Absent`], and the fail-open policy is applied by the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared allow/deny record, written by the elected reconciler and read by
/// every admission replica.
///
/// `write` must be idempotent for a fixed value and must not disturb
/// unrelated fields that happen to live on the same record. Writers are
/// serialized externally (leader election), not by the store.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Read the current gate state. Absence of the record (or of the gate
    /// field) is a defined outcome, never an error.
    async fn read(&self) -> StoreResult<StoredGate>;

    /// Upsert the gate state, creating the record if it does not exist.
    async fn write(&self, allowed: bool) -> StoreResult<()>;
}
