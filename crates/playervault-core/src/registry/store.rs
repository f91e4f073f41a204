//! Shared set of known identities.

use std::collections::HashSet;
use tokio::sync::RwLock;

use super::Identity;

/// Concurrency-safe, grow-only set of identities.
///
/// Backed by tokio's fair `RwLock`: queued writers are not starved by a
/// stream of readers and vice versa. Both critical sections are a single
/// hash-set operation (or a clone, for [`snapshot`](Self::snapshot)).
///
/// There is no removal. An identity stays known once any scan has seen it,
/// even if its record is later deleted from disk.
#[derive(Debug, Default)]
pub struct RegistryStore {
    ids: RwLock<HashSet<Identity>>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `ids` into the set, returning how many were new.
    pub async fn union<I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = Identity>,
    {
        // Collect outside the lock so the write section stays short.
        let ids: Vec<Identity> = ids.into_iter().collect();
        if ids.is_empty() {
            return 0;
        }
        let mut guard = self.ids.write().await;
        ids.into_iter().filter(|id| guard.insert(id.clone())).count()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.ids.read().await.contains(id)
    }

    /// Point-in-time copy of the whole set.
    pub async fn snapshot(&self) -> HashSet<Identity> {
        self.ids.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn set(items: &[&str]) -> HashSet<Identity> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_union_then_contains() {
        let store = RegistryStore::new();
        let a = set(&["Steve", "Alex"]);
        let b = set(&["Alex", "Notch"]);

        assert_eq!(store.union(a.clone()).await, 2);
        assert_eq!(store.union(b.clone()).await, 1);

        for id in a.union(&b) {
            assert!(store.contains(id).await, "{} should be known", id);
        }
        assert!(!store.contains("Herobrine").await);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_union_is_commutative_and_idempotent() {
        let a = set(&["a", "b"]);
        let b = set(&["b", "c", "d"]);

        let ab = RegistryStore::new();
        ab.union(a.clone()).await;
        ab.union(b.clone()).await;

        let ba = RegistryStore::new();
        ba.union(b.clone()).await;
        ba.union(a.clone()).await;
        assert_eq!(ba.union(a.clone()).await, 0);

        assert_eq!(ab.snapshot().await, ba.snapshot().await);
    }

    #[tokio::test]
    async fn test_case_sensitive_membership() {
        let store = RegistryStore::new();
        store.union(set(&["Steve"])).await;
        assert!(store.contains("Steve").await);
        assert!(!store.contains("steve").await);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let store = RegistryStore::new();
        store.union(set(&["a"])).await;
        let snap = store.snapshot().await;
        store.union(set(&["b"])).await;
        assert_eq!(snap, set(&["a"]));
        assert!(store.contains("b").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_and_readers() {
        let store = Arc::new(RegistryStore::new());
        let mut handles = Vec::new();

        for w in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    store.union([format!("w{}-{}", w, i)]).await;
                }
            }));
        }
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let _ = store.contains(&format!("w0-{}", i)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len().await, 800);
    }

    #[tokio::test]
    async fn test_empty_union_is_noop() {
        let store = RegistryStore::new();
        assert_eq!(store.union(Vec::<Identity>::new()).await, 0);
        assert!(store.is_empty().await);
    }
}
