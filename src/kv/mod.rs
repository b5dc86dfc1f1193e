pub mod seq_kv;

#[cfg(test)]
pub mod memory;

pub use seq_kv::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::common::Error;

/// Failures of a key-value call. Only `Transport` is unexpected; the other
/// two are ordinary outcomes that callers branch on.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key `{0}` does not exist")]
    KeyNotFound(String),

    #[error("compare-and-swap on `{key}` failed: value is no longer {expected}")]
    Mismatch { key: String, expected: i64 },

    #[error(transparent)]
    Transport(#[from] Error),
}

/// A sequentially consistent integer store shared by every node.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn read(&self, key: &str) -> Result<i64, KvError>;

    /// Sets `key` to `new` only if it currently holds `expected`. With
    /// `create_if_missing`, an absent key is created holding `new`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        new: i64,
        create_if_missing: bool,
    ) -> Result<(), KvError>;
}
