use super::{split_path, DocumentStore, StoreError, StoreResult, Watch};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// In-process document store with push notifications.
///
/// Used by tests and as the shared store behind the WebSocket server.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    duplicate_delivery: bool,
}

#[derive(Default)]
struct Inner {
    root: Map<String, Value>,
    watchers: Vec<Watcher>,
}

struct Watcher {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that delivers every notification twice
    pub fn with_duplicate_delivery() -> Self {
        Self {
            inner: Arc::default(),
            duplicate_delivery: true,
        }
    }

    /// Copy of the whole tree
    pub async fn dump(&self) -> Value {
        Value::Object(self.inner.lock().await.root.clone())
    }

    /// Number of live subscriptions
    pub async fn watcher_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.watchers.retain(|w| !w.tx.is_closed());
        inner.watchers.len()
    }
}

impl Inner {
    fn lookup(&self, segments: &[String]) -> Option<&Value> {
        let (first, rest) = segments.split_first()?;
        let mut current = self.root.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Push the current value of every watcher related to `changed`
    fn notify(&mut self, changed: &[String], duplicate: bool) {
        let mut deliveries = Vec::new();
        for (idx, watcher) in self.watchers.iter().enumerate() {
            if watcher.path.starts_with(changed) || changed.starts_with(&watcher.path) {
                deliveries.push((idx, self.lookup(&watcher.path).cloned()));
            }
        }

        let mut dead = Vec::new();
        for (idx, value) in deliveries {
            let tx = &self.watchers[idx].tx;
            let mut ok = tx.send(value.clone()).is_ok();
            if ok && duplicate {
                ok = tx.send(value).is_ok();
            }
            if !ok {
                dead.push(idx);
            }
        }
        for idx in dead.into_iter().rev() {
            self.watchers.swap_remove(idx);
        }
    }
}

/// Drop nulls and empty objects so absent and empty look the same
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            (!cleaned.is_empty()).then_some(Value::Object(cleaned))
        }
        other => Some(other),
    }
}

fn write_in(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(first.clone(), value);
        return;
    }
    let entry = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        write_in(child, rest, value);
    }
}

fn delete_in(map: &mut Map<String, Value>, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.remove(first);
        return;
    }
    if let Some(Value::Object(child)) = map.get_mut(first) {
        delete_in(child, rest);
        if child.is_empty() {
            map.remove(first);
        }
    }
}

fn apply(root: &mut Map<String, Value>, segments: &[String], value: Value) {
    match normalize(value) {
        Some(value) => write_in(root, segments, value),
        None => delete_in(root, segments),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        let segments = split_path(path)?;
        Ok(self.inner.lock().await.lookup(&segments).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        let segments = split_path(path)?;
        let mut inner = self.inner.lock().await;
        apply(&mut inner.root, &segments, value);
        inner.notify(&segments, self.duplicate_delivery);
        Ok(())
    }

    async fn update(&self, path: &str, partial: Map<String, Value>) -> StoreResult<()> {
        let segments = split_path(path)?;
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.lookup(&segments) {
            if !existing.is_object() {
                return Err(StoreError::NotAnObject(path.to_string()));
            }
        }
        for (key, value) in partial {
            let mut child = segments.clone();
            child.extend(split_path(&key)?);
            apply(&mut inner.root, &child, value);
        }
        inner.notify(&segments, self.duplicate_delivery);
        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let segments = split_path(path)?;
        let mut inner = self.inner.lock().await;
        delete_in(&mut inner.root, &segments);
        inner.notify(&segments, self.duplicate_delivery);
        Ok(())
    }

    async fn watch(&self, path: &str) -> StoreResult<Watch> {
        let segments = split_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let current = inner.lookup(&segments).cloned();
        // Receiver is alive, the send cannot fail
        let _ = tx.send(current);
        inner.watchers.push(Watcher { path: segments, tx });
        Ok(Watch::new(rx))
    }

    async fn set_if_absent(&self, path: &str, value: Value) -> StoreResult<bool> {
        let segments = split_path(path)?;
        let mut inner = self.inner.lock().await;
        if inner.lookup(&segments).is_some() {
            return Ok(false);
        }
        apply(&mut inner.root, &segments, value);
        inner.notify(&segments, self.duplicate_delivery);
        Ok(true)
    }
}
