// Change Notification
//
// Fan-out broadcast keyed by a monotonically increasing cursor.
// Receivers block until something newer than their cursor is
// published, or until their cancel token fires.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

/// Position in a topic's stream of published values.
///
/// Cursors are ordered: a larger cursor was published later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(u64);

impl Cursor {
    /// Position before anything was published.
    pub const START: Cursor = Cursor(0);

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something a cancel token must wake when it fires.
trait Wake: Send + Sync {
    fn wake(&self);
}

struct Shared<T> {
    buffer: Mutex<Buffer<T>>,
    changed: Condvar,
}

struct Buffer<T> {
    /// Number of values dropped from the front by pruning.
    pruned: u64,
    values: VecDeque<T>,
    /// Positions of live subscriptions.
    readers: Vec<Weak<AtomicU64>>,
}

impl<T> Buffer<T> {
    fn last(&self) -> Cursor {
        Cursor(self.pruned + self.values.len() as u64)
    }

    fn drop_through(&mut self, through: Cursor) -> usize {
        let held = self.values.len();
        let count = usize::try_from(through.0.saturating_sub(self.pruned))
            .map_or(held, |count| count.min(held));
        self.values.drain(..count);
        self.pruned += count as u64;
        count
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Buffer<T>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send> Wake for Shared<T> {
    fn wake(&self) {
        // Holding the lock orders this after any receiver that already
        // checked the token but has not started waiting yet.
        let _buffer = self.lock();
        self.changed.notify_all();
    }
}

/// External cancellation signal for blocking receives.
///
/// Clones share the same signal. Once cancelled a token stays cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Weak<dyn Wake>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal and wake every receiver blocked on it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);

        let waiters = std::mem::take(
            &mut *self
                .inner
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for waiter in waiters.iter().filter_map(Weak::upgrade) {
            waiter.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn watch(&self, target: Weak<dyn Wake>) {
        let mut waiters = self
            .inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        waiters.retain(|waiter| waiter.strong_count() > 0);
        if !waiters.iter().any(|waiter| waiter.ptr_eq(&target)) {
            waiters.push(target);
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Broadcast topic. Clones publish to and receive from the same stream.
///
/// Published values are kept until pruned. Cursors stay absolute across
/// pruning; a receiver whose cursor points into the pruned range gets the
/// oldest values still retained.
pub struct Topic<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.shared.lock();
        f.debug_struct("Topic")
            .field("published", &buffer.last())
            .field("retained", &buffer.values.len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(Buffer {
                    pruned: 0,
                    values: VecDeque::new(),
                    readers: Vec::new(),
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Publish a value and wake all blocked receivers.
    pub fn publish(&self, value: T) -> Cursor {
        let cursor = {
            let mut buffer = self.shared.lock();
            buffer.values.push_back(value);
            buffer.last()
        };
        self.shared.changed.notify_all();
        cursor
    }

    /// Cursor of the most recent publish.
    pub fn last_cursor(&self) -> Cursor {
        self.shared.lock().last()
    }

    /// Number of published values still held in memory.
    pub fn retained(&self) -> usize {
        self.shared.lock().values.len()
    }

    /// Drop every retained value published at or before `through`.
    pub fn prune(&self, through: Cursor) -> usize {
        self.shared.lock().drop_through(through)
    }

    /// Drop every value that all live subscriptions have already pulled.
    ///
    /// With no live subscriptions everything is dropped.
    pub fn prune_delivered(&self) -> usize {
        let mut buffer = self.shared.lock();
        buffer.readers.retain(|reader| reader.strong_count() > 0);

        let through = buffer
            .readers
            .iter()
            .filter_map(Weak::upgrade)
            .map(|position| Cursor(position.load(Ordering::SeqCst)))
            .min()
            .unwrap_or_else(|| buffer.last());
        buffer.drop_through(through)
    }

    /// Block until at least one value newer than `after` exists, then return
    /// all of them in publish order together with the new cursor.
    ///
    /// Returns `None` once `cancel` fires, even while blocked.
    pub fn receive(&self, after: Cursor, cancel: &CancelToken) -> Option<(Cursor, Vec<T>)> {
        let target: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        cancel.watch(target);

        let mut buffer = self.shared.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let start =
                usize::try_from(after.0.saturating_sub(buffer.pruned)).unwrap_or(usize::MAX);
            if start < buffer.values.len() {
                let newer = buffer.values.iter().skip(start).cloned().collect();
                return Some((buffer.last(), newer));
            }
            buffer = self
                .shared
                .changed
                .wait(buffer)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Iterate over values published from now on.
    pub fn subscribe(&self, cancel: CancelToken) -> Subscription<T> {
        let (cursor, position) = {
            let mut buffer = self.shared.lock();
            let cursor = buffer.last();
            let position = Arc::new(AtomicU64::new(cursor.0));
            buffer.readers.push(Arc::downgrade(&position));
            (cursor, position)
        };

        Subscription {
            topic: self.clone(),
            cursor,
            position,
            cancel,
            pending: VecDeque::new(),
        }
    }
}

/// Blocking iterator over a topic.
///
/// Yields every value published after the subscription started, one at a
/// time, and ends for good once its cancel token fires.
#[derive(Debug)]
pub struct Subscription<T> {
    topic: Topic<T>,
    cursor: Cursor,
    /// Shared with the topic so pruning keeps what this subscription has not pulled.
    position: Arc<AtomicU64>,
    cancel: CancelToken,
    pending: VecDeque<T>,
}

impl<T> Subscription<T> {
    /// Position of the last value pulled from the topic.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }
}

impl<T: Clone + Send + 'static> Iterator for Subscription<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            self.pending.clear();
            return None;
        }
        if let Some(value) = self.pending.pop_front() {
            return Some(value);
        }

        let (cursor, values) = self.topic.receive(self.cursor, &self.cancel)?;
        self.cursor = cursor;
        self.position.store(cursor.0, Ordering::SeqCst);
        self.pending.extend(values);
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn cursors_increase_with_each_publish() {
        let topic = Topic::new();
        assert_eq!(topic.last_cursor(), Cursor::START);

        let first = topic.publish("a");
        let second = topic.publish("b");

        assert!(first < second);
        assert_eq!(topic.last_cursor(), second);
    }

    #[test]
    fn receive_returns_everything_after_cursor() {
        let topic = Topic::new();
        let start = topic.publish(1);
        topic.publish(2);
        let last = topic.publish(3);

        let (cursor, values) = topic.receive(start, &CancelToken::new()).unwrap();

        assert_eq!(cursor, last);
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn receive_blocks_until_publish() {
        let topic = Topic::new();
        let publisher = topic.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            publisher.publish("late");
        });

        let (_, values) = topic.receive(Cursor::START, &CancelToken::new()).unwrap();
        assert_eq!(values, vec!["late"]);
        handle.join().unwrap();
    }

    #[test]
    fn cancel_wakes_blocked_receiver() {
        let topic = Topic::<u32>::new();
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();

        let receiver = {
            let topic = topic.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                tx.send(()).unwrap();
                topic.receive(Cursor::START, &cancel)
            })
        };

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        assert_eq!(receiver.join().unwrap(), None);
    }

    #[test]
    fn subscription_skips_earlier_values() {
        let topic = Topic::new();
        topic.publish("before");

        let mut subscription = topic.subscribe(CancelToken::new());
        topic.publish("after-1");
        topic.publish("after-2");

        assert_eq!(subscription.next(), Some("after-1"));
        assert_eq!(subscription.next(), Some("after-2"));
        assert_eq!(subscription.cursor(), topic.last_cursor());
    }

    #[test]
    fn cancelled_subscription_drops_buffered_values() {
        let topic = Topic::new();
        let cancel = CancelToken::new();
        let mut subscription = topic.subscribe(cancel.clone());

        topic.publish(1);
        topic.publish(2);
        assert_eq!(subscription.next(), Some(1));

        cancel.cancel();
        topic.publish(3);

        assert_eq!(subscription.next(), None);
        assert_eq!(subscription.next(), None);
    }

    #[test]
    fn one_token_cancels_many_topics() {
        let cancel = CancelToken::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let topic = Topic::<u8>::new();
                let cancel = cancel.clone();
                thread::spawn(move || topic.receive(Cursor::START, &cancel))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), None);
        }
    }

    #[test]
    fn pruning_keeps_cursors_absolute() {
        let topic = Topic::new();
        topic.publish("a");
        let second = topic.publish("b");
        topic.publish("c");

        assert_eq!(topic.prune(second), 2);
        assert_eq!(topic.retained(), 1);
        assert_eq!(topic.last_cursor().value(), 3);

        let (cursor, values) = topic.receive(second, &CancelToken::new()).unwrap();
        assert_eq!(cursor.value(), 3);
        assert_eq!(values, vec!["c"]);

        // A cursor inside the pruned range gets what is left.
        let (_, values) = topic.receive(Cursor::START, &CancelToken::new()).unwrap();
        assert_eq!(values, vec!["c"]);

        assert_eq!(topic.publish("d").value(), 4);
    }

    #[test]
    fn prune_delivered_waits_for_the_slowest_subscription() {
        let topic = Topic::new();
        let mut fast = topic.subscribe(CancelToken::new());
        let slow = topic.subscribe(CancelToken::new());

        topic.publish(1);
        topic.publish(2);
        assert_eq!(fast.next(), Some(1));

        assert_eq!(topic.prune_delivered(), 0);
        assert_eq!(topic.retained(), 2);

        drop(slow);
        assert_eq!(topic.prune_delivered(), 2);
        assert_eq!(topic.retained(), 0);
        assert_eq!(fast.next(), Some(2));

        topic.publish(3);
        assert_eq!(fast.next(), Some(3));
    }

    #[test]
    fn prune_delivered_without_subscriptions_drops_everything() {
        let topic = Topic::new();
        topic.publish('x');
        topic.publish('y');

        assert_eq!(topic.prune_delivered(), 2);
        assert_eq!(topic.retained(), 0);
        assert_eq!(topic.last_cursor().value(), 2);
    }
}
