//! Store-adapter seam for encrypted vault entries.
//!
//! The store is a blind collaborator: it persists opaque blobs keyed by
//! (owner, label) and has no cryptographic awareness. Concrete backends
//! live outside this crate.

use thiserror::Error;

/// One persisted vault entry. `blob` is an opaque encoded envelope; the
/// store never sees plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub label: String,
    pub username: String,
    pub blob: String,
}

/// Store backend errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient backend failure; the caller may retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Persistence interface consumed by the vault session.
pub trait EntryStore: Send + Sync {
    /// Fetch every entry owned by `owner`.
    fn get_all(&self, owner: &str) -> Result<Vec<StoredEntry>, StoreError>;

    /// Create or replace the entry keyed by (owner, label).
    fn upsert(&self, owner: &str, label: &str, username: &str, blob: &str)
        -> Result<(), StoreError>;

    /// Remove the entry keyed by (owner, label).
    fn delete(&self, owner: &str, label: &str) -> Result<(), StoreError>;
}
