//! Observable single-value state containers.
//!
//! A [`LiveData`] holds exactly one value. Readers call [`LiveData::get`];
//! observers register with [`LiveData::subscribe`] and are notified
//! synchronously on every change.
//!
//! ## Equality
//!
//! Containers use **value equality** (`PartialEq`). Setting a value equal to
//! the current one is a no-op: nothing is stored and nobody is notified.
//!
//! ## Re-entrancy
//!
//! Callbacks run outside every internal lock, against a snapshot of the
//! subscriber list taken when the change happened. A callback may read or
//! write the container, subscribe, or dispose any subscription (including its
//! own). A subscription removed during a notification round may still receive
//! that round's value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: Mutex<T>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

/// Lock a mutex, recovering the data if a panicking callback poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Push-based observable value.
///
/// Cloning a `LiveData` yields another handle to the same cell.
pub struct LiveData<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for LiveData<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LiveData<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LiveData").field(&*lock(&self.inner.value)).finish()
    }
}

impl<T: Default + Clone + PartialEq + Send + 'static> Default for LiveData<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + Send + 'static> LiveData<T> {
    /// Create a container holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(value),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current value (cloned).
    pub fn get(&self) -> T {
        lock(&self.inner.value).clone()
    }

    /// Borrow the current value without cloning.
    ///
    /// The container is locked while `f` runs; `f` must not write to it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.inner.value))
    }

    /// Replace the value. Returns `true` if it changed and subscribers were
    /// notified.
    ///
    /// Under concurrent writers notifications from different `set` calls may
    /// interleave; a subscriber that needs the latest value should read
    /// [`get`](Self::get).
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = lock(&self.inner.value);
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.notify(&value);
        true
    }

    /// Atomically derive the next value from the current one.
    ///
    /// Concurrent `update` calls never lose each other's changes.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = {
            let mut current = lock(&self.inner.value);
            let next = f(&current);
            if *current == next {
                return false;
            }
            *current = next.clone();
            next
        };
        self.notify(&next);
        true
    }

    /// Register `callback` for every future change.
    ///
    /// The callback is not invoked with the current value.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).push((id, Arc::new(callback)));

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.subscribers).retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.inner.subscribers)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }
}

/// Disposer returned by [`LiveData::subscribe`].
///
/// De-registers on [`unsubscribe`](Self::unsubscribe) or drop, whichever
/// comes first. Use [`forget`](Self::forget) to keep the callback for the
/// container's lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// De-register the callback. Safe to call more than once and from inside
    /// the callback itself.
    pub fn unsubscribe(&self) {
        let detach = lock(&self.detach).take();
        if let Some(detach) = detach {
            detach();
        }
    }

    /// Leave the callback registered until the container is dropped.
    pub fn forget(self) {
        lock(&self.detach).take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &lock(&self.detach).is_some())
            .finish()
    }
}

/// A container derived from two sources.
///
/// Recomputed whenever either source changes. One caller at a time drains
/// pending changes and always reads both sources' latest values, so
/// concurrent writers cannot leave a stale projection behind. A subscriber of
/// the output may write either source: the write marks the projection dirty
/// and the draining caller recomputes once more after notification returns.
pub struct Computed<T> {
    output: LiveData<T>,
    sources: Mutex<Vec<Subscription>>,
}

/// Drain state shared by both source subscriptions.
#[derive(Default)]
struct Recompute {
    draining: AtomicBool,
    dirty: AtomicBool,
}

impl Recompute {
    /// Mark dirty and, unless someone is already draining, recompute until
    /// no change is pending.
    fn run(&self, step: impl Fn()) {
        self.dirty.store(true, Ordering::SeqCst);
        loop {
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            while self.dirty.swap(false, Ordering::SeqCst) {
                step();
            }
            self.draining.store(false, Ordering::SeqCst);
            // A writer may have marked dirty after the last swap but seen
            // `draining` still set.
            if !self.dirty.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Computed<T> {
    pub fn from2<A, B, F>(a: &LiveData<A>, b: &LiveData<B>, f: F) -> Self
    where
        A: Clone + PartialEq + Send + 'static,
        B: Clone + PartialEq + Send + 'static,
        F: Fn(&A, &B) -> T + Send + Sync + 'static,
    {
        let output = LiveData::new(f(&a.get(), &b.get()));
        let recompute: Arc<dyn Fn() + Send + Sync> = {
            let (a, b, output) = (a.clone(), b.clone(), output.clone());
            let state = Recompute::default();
            Arc::new(move || {
                state.run(|| {
                    output.set(f(&a.get(), &b.get()));
                })
            })
        };

        let on_a = recompute.clone();
        let on_b = recompute;
        let sources = vec![
            a.subscribe(move |_| on_a()),
            b.subscribe(move |_| on_b()),
        ];

        Self {
            output,
            sources: Mutex::new(sources),
        }
    }

    /// The derived container. Read and subscribe only.
    pub fn data(&self) -> &LiveData<T> {
        &self.output
    }

    pub fn get(&self) -> T {
        self.output.get()
    }

    /// Stop following the sources. The last computed value is kept.
    pub fn detach(&self) {
        let sources = std::mem::take(&mut *lock(&self.sources));
        drop(sources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_get_and_set() {
        let data = LiveData::new(1);
        assert_eq!(data.get(), 1);
        assert!(data.set(2));
        assert_eq!(data.get(), 2);
    }

    #[test]
    fn test_equal_value_does_not_notify() {
        let data = LiveData::new("a".to_string());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _sub = data.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!data.set("a".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(data.set("b".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_receives_new_value() {
        let data = LiveData::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = data.subscribe(move |v| s.lock().unwrap().push(*v));

        data.set(1);
        data.set(2);
        data.update(|v| v + 10);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 12]);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let data = LiveData::new(0);
        let sub1 = data.subscribe(|_| {});
        let sub2 = data.subscribe(|_| {});
        assert_eq!(data.subscriber_count(), 2);

        sub1.unsubscribe();
        sub1.unsubscribe();
        assert_eq!(data.subscriber_count(), 1);

        drop(sub2);
        assert_eq!(data.subscriber_count(), 0);
    }

    #[test]
    fn test_forget_keeps_callback() {
        let data = LiveData::new(0);
        data.subscribe(|_| {}).forget();
        assert_eq!(data.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let data = LiveData::new(0);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let (s, h) = (slot.clone(), hits.clone());
        let sub = data.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        data.set(1);
        data.set(2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(data.subscriber_count(), 0);
    }

    #[test]
    fn test_set_from_inside_callback() {
        let data = LiveData::new(0);
        let d = data.clone();
        let _sub = data.subscribe(move |v| {
            if *v < 3 {
                d.set(v + 1);
            }
        });

        data.set(1);
        assert_eq!(data.get(), 3);
    }

    #[test]
    fn test_subscribe_from_inside_callback() {
        let data = LiveData::new(0);
        let late: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let (d, l) = (data.clone(), late.clone());
        let _sub = data.subscribe(move |_| {
            l.lock().unwrap().push(d.subscribe(|_| {}));
        });

        data.set(1);
        assert_eq!(data.subscriber_count(), 2);
    }

    #[test]
    fn test_update_is_atomic_across_threads() {
        let data = LiveData::new(0usize);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = data.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        d.update(|v| v + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(data.get(), 800);
    }

    #[test]
    fn test_computed_follows_both_sources() {
        let left = LiveData::new(vec![1, 2]);
        let right = LiveData::new(vec![3]);
        let joined = Computed::from2(&left, &right, |l: &Vec<i32>, r: &Vec<i32>| {
            l.iter().chain(r.iter()).copied().collect::<Vec<_>>()
        });
        assert_eq!(joined.get(), vec![1, 2, 3]);

        left.set(vec![0]);
        assert_eq!(joined.get(), vec![0, 3]);

        right.set(vec![9, 8]);
        assert_eq!(joined.get(), vec![0, 9, 8]);
    }

    #[test]
    fn test_computed_subscriber_writes_source() {
        let a = LiveData::new(0);
        let b = LiveData::new(0);
        let sum = Computed::from2(&a, &b, |a: &i32, b: &i32| a + b);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (b2, s) = (b.clone(), seen.clone());
        let _sub = sum.data().subscribe(move |v| {
            s.lock().unwrap().push(*v);
            if *v == 1 {
                b2.set(10);
            }
        });

        a.set(1);
        assert_eq!(sum.get(), 11);
        assert_eq!(*seen.lock().unwrap(), vec![1, 11]);

        a.set(2);
        assert_eq!(sum.get(), 12);
    }

    #[test]
    fn test_computed_concurrent_writers_settle_on_latest() {
        let a = LiveData::new(0usize);
        let b = LiveData::new(0usize);
        let sum = Computed::from2(&a, &b, |a: &usize, b: &usize| a + b);

        let handles: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|source| {
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        source.update(|v| v + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sum.get(), 400);
    }

    #[test]
    fn test_computed_detach() {
        let a = LiveData::new(1);
        let b = LiveData::new(1);
        let sum = Computed::from2(&a, &b, |a: &i32, b: &i32| a + b);
        sum.detach();

        a.set(5);
        assert_eq!(sum.get(), 2);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 0);
    }
}
