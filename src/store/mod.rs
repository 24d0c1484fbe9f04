//! Shared document store
//!
//! A hierarchical key/value store with point writes, subtree deletes, merges
//! and per-path subscriptions. All coordination logic is written against the
//! [`DocumentStore`] trait so the backing store can be swapped.

mod memory;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid store path: {0:?}")]
    InvalidPath(String),

    #[error("Cannot merge into {0}: existing value is not an object")]
    NotAnObject(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Split a `/`-separated path into segments.
/// Leading and trailing slashes are ignored; empty segments are rejected.
pub fn split_path(path: &str) -> StoreResult<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                Err(StoreError::InvalidPath(path.to_string()))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

/// Subscription to one path.
///
/// Yields the current value (or `None` when absent) right after creation and
/// again after every change at, above or below the watched path. Delivery is
/// at-least-once: the same value may arrive more than once.
pub struct Watch {
    rx: mpsc::UnboundedReceiver<Option<Value>>,
}

impl Watch {
    pub fn new(rx: mpsc::UnboundedReceiver<Option<Value>>) -> Self {
        Self { rx }
    }

    /// Wait for the next notification. `None` means the store hung up.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = Option<Value>> + Send + Unpin {
        Box::pin(stream::unfold(self, |mut watch| async move {
            watch.next().await.map(|value| (value, watch))
        }))
    }
}

/// Contract the session coordinator requires from the shared store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read of a path (subtrees come back as objects)
    async fn get(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Point write. Writing `null` removes the path.
    async fn set(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Merge children into the object at `path`. `null` children are removed.
    async fn update(&self, path: &str, partial: Map<String, Value>) -> StoreResult<()>;

    /// Subtree delete
    async fn remove(&self, path: &str) -> StoreResult<()>;

    /// Subscribe to a path
    async fn watch(&self, path: &str) -> StoreResult<Watch>;

    /// Conditional put: write only if nothing is stored at `path`.
    /// Returns whether this call performed the write.
    ///
    /// The default is a get-then-set and leaves a small race window;
    /// backends with a native compare-and-set should override it.
    async fn set_if_absent(&self, path: &str, value: Value) -> StoreResult<bool> {
        if self.get(path).await?.is_some() {
            return Ok(false);
        }
        self.set(path, value).await?;
        Ok(true)
    }
}

impl dyn DocumentStore {
    /// Read and deserialize a value
    pub async fn get_as<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        match self.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value
    pub async fn put<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> StoreResult<()> {
        self.set(path, serde_json::to_value(value)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("/spy/abc/players/").unwrap(),
            vec!["spy", "abc", "players"]
        );
        assert!(split_path("").is_err());
        assert!(split_path("/").is_err());
        assert!(split_path("spy//players").is_err());
    }
}
