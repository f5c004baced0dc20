use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per key, created on first use.
///
/// Work on different keys proceeds in parallel; work on the same key is
/// serialized. An entry is dropped once no caller holds or waits on it.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Run `f` while holding the mutex for `key`.
    pub fn with_lock<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let out = {
            let _guard: MutexGuard<'_, ()> = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(key, &lock);
        out
    }

    fn release(&self, key: &K, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // New clones are only handed out under the map lock, so a count of two
        // (map + `lock`) means nobody else is holding or waiting.
        let idle = Arc::strong_count(lock) == 2
            && locks.get(key).is_some_and(|held| Arc::ptr_eq(held, lock));
        if idle {
            locks.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_key_shares_one_mutex() {
        let locks = KeyedLocks::new();
        let a = locks.lock_for(&"a");
        assert!(Arc::ptr_eq(&a, &locks.lock_for(&"a")));
        assert!(!Arc::ptr_eq(&a, &locks.lock_for(&"b")));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn idle_keys_are_released() {
        let locks = KeyedLocks::new();
        for day in 0..100 {
            assert_eq!(locks.with_lock(&day, || day * 2), day * 2);
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn held_key_survives_another_callers_release() {
        let locks = KeyedLocks::new();
        let held = locks.lock_for(&"k");
        locks.with_lock(&"k", || {});
        assert_eq!(locks.len(), 1);
        assert!(Arc::ptr_eq(&held, &locks.lock_for(&"k")));
    }

    #[test]
    fn same_key_sections_never_overlap() {
        let locks = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    locks.with_lock(&"key", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
