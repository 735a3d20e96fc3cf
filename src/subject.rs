//! Broadcast channel primitive.
//!
//! A [`Subject`] fans a message out to every currently-registered subscriber,
//! synchronously and in subscription order. [`Subject::filter`] and
//! [`Subject::map`] build derived subjects that attach to their source lazily:
//! the upstream subscription is created when the first downstream subscriber
//! arrives and torn down when the last one leaves, cascading through chains of
//! derived subjects so nothing keeps listening on behalf of nobody.
//!
//! # Example
//!
//! ```
//! use canopy_rpc::subject::Subject;
//!
//! let numbers: Subject<i64> = Subject::new();
//! let evens = numbers.filter(|n| n % 2 == 0);
//!
//! let sub = evens.subscribe(|n| println!("even: {n}"));
//! numbers.send(1);
//! numbers.send(2);
//! sub.unsubscribe();
//! assert_eq!(numbers.subscriber_count(), 0);
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;
type Connect = Arc<dyn Fn() -> Subscription + Send + Sync>;

/// Handle for an active subscription. Unsubscribes on drop or via
/// [`Subscription::unsubscribe`]; either way the teardown runs at most once.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a teardown closure.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with no teardown. Used where the protocol calls for a
    /// silent no-op registration.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Tear the subscription down now.
    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct State<T> {
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
    /// Derived subjects only: creates the upstream subscription on demand.
    connect: Option<Connect>,
    /// Live upstream subscription while at least one subscriber exists.
    upstream: Option<Subscription>,
}

struct Core<T> {
    state: Mutex<State<T>>,
}

/// An addressable broadcast primitive supporting subscribe/send and derived
/// filter/map views. Cheaply cloneable; clones share the subscriber set.
pub struct Subject<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    /// Create a root subject with no subscribers.
    pub fn new() -> Self {
        Self {
            core: Arc::new(Core {
                state: Mutex::new(State {
                    subscribers: Vec::new(),
                    next_id: 0,
                    connect: None,
                    upstream: None,
                }),
            }),
        }
    }

    fn from_core(core: Arc<Core<T>>) -> Self {
        Self { core }
    }

    /// Send a message to every currently-registered subscriber, in
    /// subscription order. Subscribers added during the send do not receive
    /// the in-flight message; the subscriber set is snapshotted first, so a
    /// handler unsubscribing itself (or others) mid-dispatch cannot corrupt
    /// iteration.
    pub fn send(&self, message: T) {
        let snapshot: Vec<Callback<T>> = {
            let state = self.core.state.lock();
            state.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };

        for callback in snapshot {
            callback(message.clone());
        }
    }

    /// Register a subscriber. The returned [`Subscription`] removes it when
    /// dropped or explicitly unsubscribed.
    ///
    /// For derived subjects, the first subscriber also attaches the upstream
    /// link to the source subject.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (id, connect) = {
            let mut state = self.core.state.lock();
            let id = state.next_id;
            state.next_id += 1;

            let was_empty = state.subscribers.is_empty();
            state.subscribers.push((id, Arc::new(handler)));

            let connect = if was_empty && state.upstream.is_none() {
                state.connect.clone()
            } else {
                None
            };
            (id, connect)
        };

        // Attach outside the lock: connecting subscribes on the source
        // subject, which takes the source's lock.
        if let Some(connect) = connect {
            let upstream = connect();
            let mut state = self.core.state.lock();
            if state.subscribers.is_empty() {
                // Subscriber vanished while attaching; let the link drop.
                drop(state);
                drop(upstream);
            } else {
                state.upstream = Some(upstream);
            }
        }

        let weak = Arc::downgrade(&self.core);
        Subscription::new(move || {
            if let Some(core) = weak.upgrade() {
                Self::remove(&core, id);
            }
        })
    }

    fn remove(core: &Arc<Core<T>>, id: u64) {
        let upstream = {
            let mut state = core.state.lock();
            state.subscribers.retain(|(sub_id, _)| *sub_id != id);
            if state.subscribers.is_empty() {
                state.upstream.take()
            } else {
                None
            }
        };
        // Dropping the upstream subscription outside the lock lets the
        // teardown cascade through chained derived subjects.
        drop(upstream);
    }

    /// Number of currently-registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.core.state.lock().subscribers.len()
    }

    /// Derived subject forwarding only messages matching the predicate.
    pub fn filter<F>(&self, predicate: F) -> Subject<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.derive(move |message| {
            if predicate(&message) {
                Some(message)
            } else {
                None
            }
        })
    }

    /// Derived subject forwarding transformed messages.
    pub fn map<U, F>(&self, transform: F) -> Subject<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.derive(move |message| Some(transform(message)))
    }

    /// Derived subject whose transform may suppress emission by returning
    /// `None`.
    pub fn filter_map<U, F>(&self, transform: F) -> Subject<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        self.derive(transform)
    }

    fn derive<U, F>(&self, transform: F) -> Subject<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let downstream: Subject<U> = Subject::new();
        let weak: Weak<Core<U>> = Arc::downgrade(&downstream.core);
        let source = self.clone();
        let transform = Arc::new(transform);

        let connect: Connect = Arc::new(move || {
            let weak = weak.clone();
            let transform = transform.clone();
            source.subscribe(move |message: T| {
                if let Some(mapped) = transform(message) {
                    if let Some(core) = weak.upgrade() {
                        Subject::from_core(core).send(mapped);
                    }
                }
            })
        });

        downstream.core.state.lock().connect = Some(connect);
        downstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_send_reaches_subscribers_in_order() {
        let subject: Subject<i64> = Subject::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_a = log.clone();
        let _a = subject.subscribe(move |n| log_a.lock().push(("a", n)));
        let log_b = log.clone();
        let _b = subject.subscribe(move |n| log_b.lock().push(("b", n)));

        subject.send(7);

        assert_eq!(*log.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_one_of_two() {
        let subject: Subject<i64> = Subject::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        let first = subject.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        let _second = subject.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        subject.send(0);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        first.unsubscribe();
        subject.send(0);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let subject: Subject<i64> = Subject::new();
        {
            let _sub = subject.subscribe(|_| {});
            assert_eq!(subject.subscriber_count(), 1);
        }
        assert_eq!(subject.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_added_during_send_misses_message() {
        let subject: Subject<i64> = Subject::new();
        let late_hits = Arc::new(AtomicUsize::new(0));
        let subs: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let inner_subject = subject.clone();
        let inner_hits = late_hits.clone();
        let inner_subs = subs.clone();
        let _outer = subject.subscribe(move |_| {
            let hits = inner_hits.clone();
            let sub = inner_subject.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
            inner_subs.lock().push(sub);
        });

        subject.send(1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        subject.send(2);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself_during_send() {
        let subject: Subject<i64> = Subject::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner_slot = slot.clone();
        let inner_hits = hits.clone();
        let sub = subject.subscribe(move |_| {
            inner_hits.fetch_add(1, Ordering::SeqCst);
            // Removes itself; the in-flight snapshot is unaffected.
            inner_slot.lock().take();
        });
        *slot.lock() = Some(sub);

        subject.send(1);
        subject.send(2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(subject.subscriber_count(), 0);
    }

    #[test]
    fn test_filter_forwards_matching_only() {
        let subject: Subject<i64> = Subject::new();
        let evens = subject.filter(|n| n % 2 == 0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = seen.clone();
        let _sub = evens.subscribe(move |n| inner.lock().push(n));

        for n in 1..=4 {
            subject.send(n);
        }
        assert_eq!(*seen.lock(), vec![2, 4]);
    }

    #[test]
    fn test_map_transforms() {
        let subject: Subject<i64> = Subject::new();
        let doubled = subject.map(|n| n * 2);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = seen.clone();
        let _sub = doubled.subscribe(move |n| inner.lock().push(n));

        subject.send(3);
        assert_eq!(*seen.lock(), vec![6]);
    }

    #[test]
    fn test_filter_map_suppresses_without_breaking_chain() {
        let subject: Subject<i64> = Subject::new();
        let odd_strings = subject.filter_map(|n| (n % 2 == 1).then(|| n.to_string()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = seen.clone();
        let _sub = odd_strings.subscribe(move |s| inner.lock().push(s));

        subject.send(1);
        subject.send(2);
        subject.send(3);
        assert_eq!(*seen.lock(), vec!["1".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_derived_attaches_lazily() {
        let subject: Subject<i64> = Subject::new();
        let derived = subject.filter(|_| true);

        assert_eq!(subject.subscriber_count(), 0);

        let sub = derived.subscribe(|_| {});
        assert_eq!(subject.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(subject.subscriber_count(), 0);
    }

    #[test]
    fn test_teardown_cascades_through_chain() {
        let subject: Subject<i64> = Subject::new();
        let filtered = subject.filter(|n| *n > 0);
        let mapped = filtered.map(|n| n + 1);

        let sub = mapped.subscribe(|_| {});
        assert_eq!(subject.subscriber_count(), 1);
        assert_eq!(filtered.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(filtered.subscriber_count(), 0);
        assert_eq!(subject.subscriber_count(), 0);
    }

    #[test]
    fn test_upstream_survives_while_any_downstream_remains() {
        let subject: Subject<i64> = Subject::new();
        let derived = subject.filter(|_| true);

        let first = derived.subscribe(|_| {});
        let _second = derived.subscribe(|_| {});
        assert_eq!(subject.subscriber_count(), 1);

        first.unsubscribe();
        assert_eq!(subject.subscriber_count(), 1);
    }

    #[test]
    fn test_reattach_after_full_teardown() {
        let subject: Subject<i64> = Subject::new();
        let derived = subject.map(|n| n);
        let seen = Arc::new(AtomicUsize::new(0));

        let s1 = seen.clone();
        let sub = derived.subscribe(move |_| {
            s1.fetch_add(1, Ordering::SeqCst);
        });
        subject.send(1);
        sub.unsubscribe();
        assert_eq!(subject.subscriber_count(), 0);

        let s2 = seen.clone();
        let _sub = derived.subscribe(move |_| {
            s2.fetch_add(1, Ordering::SeqCst);
        });
        subject.send(2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
