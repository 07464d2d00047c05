//! Key/value collaborator
//!
//! In-memory bucket with revisions, subject-style key filters and watches.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use contracts::KvError;
use futures_util::future::select_all;
use tokio::sync::broadcast;
use tracing::trace;

use crate::subject;

const WATCH_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOperation {
    Put,
    Delete,
}

/// One change observed by a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvUpdate {
    pub key: String,
    /// `None` for deletes
    pub value: Option<Bytes>,
    pub revision: u64,
    pub operation: KvOperation,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    revision: u64,
}

struct KvInner {
    bucket: String,
    entries: Mutex<(u64, BTreeMap<String, Entry>)>,
    /// `None` once closed; dropping the sender ends every watcher
    updates: Mutex<Option<broadcast::Sender<KvUpdate>>>,
}

/// In-memory key/value bucket
///
/// Cheap to clone; clones share one bucket.
#[derive(Clone)]
pub struct InMemoryKv {
    inner: Arc<KvInner>,
}

impl InMemoryKv {
    pub fn new(bucket: impl Into<String>) -> Self {
        let (updates, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Arc::new(KvInner {
                bucket: bucket.into(),
                entries: Mutex::new((0, BTreeMap::new())),
                updates: Mutex::new(Some(updates)),
            }),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    fn entries(&self) -> MutexGuard<'_, (u64, BTreeMap<String, Entry>)> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn updates(&self) -> MutexGuard<'_, Option<broadcast::Sender<KvUpdate>>> {
        self.inner
            .updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> KvError {
        KvError::Closed {
            bucket: self.inner.bucket.clone(),
        }
    }

    fn ensure_open(&self) -> Result<(), KvError> {
        if self.updates().is_some() {
            Ok(())
        } else {
            Err(self.closed_error())
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        self.ensure_open()?;
        Ok(self.entries().1.get(key).map(|e| e.value.clone()))
    }

    /// Store a value, returns its revision
    pub fn put(&self, key: &str, value: impl Into<Bytes>) -> Result<u64, KvError> {
        self.ensure_open()?;
        let value = value.into();
        let revision = {
            let mut guard = self.entries();
            guard.0 += 1;
            let revision = guard.0;
            guard.1.insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    revision,
                },
            );
            revision
        };
        self.notify(KvUpdate {
            key: key.to_string(),
            value: Some(value),
            revision,
            operation: KvOperation::Put,
        });
        Ok(revision)
    }

    /// Remove a key; deleting a missing key is not an error
    pub fn delete(&self, key: &str) -> Result<(), KvError> {
        self.ensure_open()?;
        let revision = {
            let mut guard = self.entries();
            if guard.1.remove(key).is_none() {
                return Ok(());
            }
            guard.0 += 1;
            guard.0
        };
        self.notify(KvUpdate {
            key: key.to_string(),
            value: None,
            revision,
            operation: KvOperation::Delete,
        });
        Ok(())
    }

    /// Keys matching `filter` in sorted order
    pub fn keys(&self, filter: &str) -> Result<Vec<String>, KvError> {
        self.ensure_open()?;
        Ok(self
            .entries()
            .1
            .keys()
            .filter(|key| subject::matches(filter, key))
            .cloned()
            .collect())
    }

    /// Revision of the current value of `key`
    pub fn revision(&self, key: &str) -> Option<u64> {
        self.entries().1.get(key).map(|e| e.revision)
    }

    /// Watch future changes on keys matching `filter`
    pub fn watch(&self, filter: &str) -> Result<KvWatcher, KvError> {
        let rx = self
            .updates()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| self.closed_error())?;
        Ok(KvWatcher {
            filter: filter.to_string(),
            rx,
        })
    }

    /// Number of live watchers
    pub fn watcher_count(&self) -> usize {
        self.updates()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Close the bucket; watchers end after draining
    pub fn close(&self) {
        self.updates().take();
    }

    fn notify(&self, update: KvUpdate) {
        trace!(bucket = %self.inner.bucket, key = %update.key, revision = update.revision, "kv update");
        if let Some(tx) = self.updates().as_ref() {
            // no receivers is fine
            let _ = tx.send(update);
        }
    }
}

/// Stream of updates for one key filter
pub struct KvWatcher {
    filter: String,
    rx: broadcast::Receiver<KvUpdate>,
}

impl KvWatcher {
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Next matching update; `None` once the bucket is closed
    pub async fn next(&mut self) -> Option<KvUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) if subject::matches(&self.filter, &update.key) => return Some(update),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(filter = %self.filter, skipped, "kv watcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// First update from any watcher, tagged with the watcher's index
///
/// The losing watchers are dropped, which ends their watches. Watchers that
/// end without an update are skipped; `None` when all of them end.
pub async fn watch_first(watchers: Vec<KvWatcher>) -> Option<(usize, KvUpdate)> {
    let mut pending: Vec<_> = watchers
        .into_iter()
        .enumerate()
        .map(|(idx, mut watcher)| Box::pin(async move { (idx, watcher.next().await) }))
        .collect();

    while !pending.is_empty() {
        let ((idx, update), _, rest) = select_all(pending).await;
        if let Some(update) = update {
            return Some((idx, update));
        }
        pending = rest;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_put_get_delete() {
        let kv = InMemoryKv::new("sensors");
        let r1 = kv.put("sensors.1.name", "strain").unwrap();
        let r2 = kv.put("sensors.1.name", "strain-a").unwrap();
        assert!(r2 > r1);
        assert_eq!(
            kv.get("sensors.1.name").unwrap(),
            Some(Bytes::from_static(b"strain-a"))
        );
        assert_eq!(kv.revision("sensors.1.name"), Some(r2));
        kv.delete("sensors.1.name").unwrap();
        assert_eq!(kv.get("sensors.1.name").unwrap(), None);
        kv.delete("sensors.1.name").unwrap();
    }

    #[test]
    fn test_keys_filter() {
        let kv = InMemoryKv::new("sensors");
        kv.put("sensors.1.name", "a").unwrap();
        kv.put("sensors.1.value", "1").unwrap();
        kv.put("sensors.2.name", "b").unwrap();
        kv.put("assets.1", "x").unwrap();

        assert_eq!(
            kv.keys("sensors.*.name").unwrap(),
            vec!["sensors.1.name", "sensors.2.name"]
        );
        assert_eq!(kv.keys("sensors.>").unwrap().len(), 3);
        assert_eq!(kv.keys(">").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_watch_filters_keys() {
        let kv = InMemoryKv::new("sensors");
        let mut watcher = kv.watch("sensors.2.>").unwrap();
        kv.put("sensors.1.value", "1").unwrap();
        kv.put("sensors.2.value", "2").unwrap();

        let update = watcher.next().await.unwrap();
        assert_eq!(update.key, "sensors.2.value");
        assert_eq!(update.operation, KvOperation::Put);
    }

    #[tokio::test]
    async fn test_watch_first_returns_winner() {
        let kv = InMemoryKv::new("sensors");
        let watchers = vec![
            kv.watch("sensors.1.>").unwrap(),
            kv.watch("sensors.2.>").unwrap(),
        ];

        let writer = kv.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            writer.put("sensors.2.value", "9").unwrap();
        });

        let (idx, update) = tokio::time::timeout(Duration::from_secs(1), watch_first(watchers))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(idx, 1);
        assert_eq!(update.value, Some(Bytes::from_static(b"9")));
        // the losing watcher was dropped with the race
        assert_eq!(kv.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_watchers() {
        let kv = InMemoryKv::new("sensors");
        let watchers = vec![kv.watch(">").unwrap(), kv.watch(">").unwrap()];
        kv.close();
        assert_eq!(watch_first(watchers).await, None);
        assert!(matches!(kv.put("a", "b"), Err(KvError::Closed { .. })));
    }
}
