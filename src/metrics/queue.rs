//! Delaying work queue with per-key deduplication.
//!
//! Keys are scheduled with [`DelayedEvictionQueue::add_after`] and handed to a
//! consumer by [`DelayedEvictionQueue::get`] once their delay has elapsed. A key
//! that is already pending is not scheduled twice, and a key is never handed
//! out again until the consumer calls [`DelayedEvictionQueue::done`] for it.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashSet, VecDeque},
    hash::Hash,
    pin::pin,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

// Deadline used when `now + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct Scheduled<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Scheduled<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Scheduled<K> {}

impl<K> PartialOrd for Scheduled<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so that `BinaryHeap` pops the earliest deadline first.
impl<K> Ord for Scheduled<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<K> {
    /// Keys waiting for their delay to elapse.
    waiting: BinaryHeap<Scheduled<K>>,
    /// Keys ready to be handed out, in release order.
    ready: VecDeque<K>,
    /// Every key that is waiting, ready or parked.
    pending: HashSet<K>,
    /// Keys handed out and not yet marked done.
    processing: HashSet<K>,
    /// Keys that became ready while still processing; released on `done`.
    parked: HashSet<K>,
    seq: u64,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> QueueState<K> {
    /// Moves every due key from `waiting` to `ready` (or `parked`).
    fn promote_due(&mut self, now: Instant) {
        while self.waiting.peek().is_some_and(|next| next.ready_at <= now) {
            let Some(Scheduled { key, .. }) = self.waiting.pop() else {
                break;
            };
            if self.processing.contains(&key) {
                self.parked.insert(key);
            } else {
                self.ready.push_back(key);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.peek().map(|next| next.ready_at)
    }
}

/// Delay queue keyed by `K`.
pub struct DelayedEvictionQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K: Eq + Hash + Clone> Default for DelayedEvictionQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> DelayedEvictionQueue<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                waiting: BinaryHeap::new(),
                ready: VecDeque::new(),
                pending: HashSet::new(),
                processing: HashSet::new(),
                parked: HashSet::new(),
                seq: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules `key` to be released after `delay`.
    ///
    /// Returns false without rescheduling if `key` is already pending or the
    /// queue is shutting down.
    pub fn add_after(&self, key: K, delay: Duration) -> bool {
        {
            let mut state = self.lock();
            if state.shutting_down || state.pending.contains(&key) {
                return false;
            }
            state.pending.insert(key.clone());
            if delay.is_zero() {
                if state.processing.contains(&key) {
                    state.parked.insert(key);
                } else {
                    state.ready.push_back(key);
                }
            } else {
                state.seq += 1;
                let seq = state.seq;
                let now = Instant::now();
                let ready_at = now
                    .checked_add(delay)
                    .unwrap_or_else(|| now + FAR_FUTURE);
                state.waiting.push(Scheduled {
                    ready_at,
                    seq,
                    key,
                });
            }
        }
        // Wakes consumers to hand out a ready key or to re-arm on an earlier deadline.
        self.notify.notify_waiters();
        true
    }

    /// Waits for the next released key.
    ///
    /// Returns `None` once the queue is shutting down and no ready key is left.
    /// Keys still waiting for their delay at shutdown are dropped.
    pub async fn get(&self) -> Option<K> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if !state.shutting_down {
                    state.promote_due(Instant::now());
                }
                if let Some(key) = state.ready.pop_front() {
                    state.pending.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
                state.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks `key` as processed so it can be handed out again.
    pub fn done(&self, key: &K) {
        let released = {
            let mut state = self.lock();
            state.processing.remove(key);
            match state.parked.take(key) {
                Some(key) => {
                    state.ready.push_back(key);
                    true
                }
                None => false,
            }
        };
        if released {
            self.notify.notify_waiters();
        }
    }

    /// Stops the queue: pending delays are abandoned, new keys are refused and
    /// consumers observe `None` once the ready keys are drained.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
            let waiting: Vec<K> = state.waiting.drain().map(|scheduled| scheduled.key).collect();
            for key in waiting {
                state.pending.remove(&key);
            }
            let parked: Vec<K> = state.parked.drain().collect();
            for key in parked {
                state.pending.remove(&key);
            }
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys scheduled and not yet handed out.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::{self, timeout};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn releases_after_delay() {
        let queue = DelayedEvictionQueue::new();
        let start = Instant::now();
        assert!(queue.add_after("pod-a", Duration::from_secs(60)));

        assert_eq!(queue.get().await, Some("pod-a"));
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn not_released_before_delay() {
        let queue = DelayedEvictionQueue::new();
        queue.add_after("pod-a", Duration::from_secs(60));

        let early = timeout(Duration::from_secs(59), queue.get()).await;
        assert!(early.is_err(), "key released before its delay elapsed");
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_delay_is_clamped() {
        let queue = DelayedEvictionQueue::new();
        let huge = humantime::parse_duration("300000000000years").unwrap();

        assert!(queue.add_after("pod-a", huge));
        assert!(queue.add_after("pod-b", Duration::MAX));
        assert_eq!(queue.len(), 2);

        let early = timeout(Duration::from_secs(86400 * 365), queue.get()).await;
        assert!(early.is_err(), "key with an oversized delay was released");

        queue.add_after("pod-c", Duration::from_secs(1));
        assert_eq!(queue.get().await, Some("pod-c"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_add_releases_once() {
        let queue = DelayedEvictionQueue::new();
        assert!(queue.add_after("pod-a", Duration::from_secs(10)));
        assert!(!queue.add_after("pod-a", Duration::from_secs(10)));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.get().await, Some("pod-a"));
        queue.done(&"pod-a");

        let second = timeout(Duration::from_secs(120), queue.get()).await;
        assert!(second.is_err(), "duplicate add produced a second release");
    }

    #[tokio::test(start_paused = true)]
    async fn releases_in_deadline_order() {
        let queue = DelayedEvictionQueue::new();
        queue.add_after("late", Duration::from_secs(30));
        queue.add_after("early", Duration::from_secs(10));
        queue.add_after("middle", Duration::from_secs(20));

        let mut released = Vec::new();
        for _ in 0..3 {
            let key = queue.get().await.unwrap();
            queue.done(&key);
            released.push(key);
        }
        assert_eq!(released, vec!["early", "middle", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_key_added_while_waiting_wakes_consumer() {
        let queue = Arc::new(DelayedEvictionQueue::new());
        queue.add_after("slow", Duration::from_secs(300));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        time::sleep(Duration::from_secs(1)).await;
        queue.add_after("fast", Duration::from_secs(5));

        let released = timeout(Duration::from_secs(10), consumer)
            .await
            .expect("consumer should wake for the earlier deadline")
            .unwrap();
        assert_eq!(released, Some("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn key_can_be_rescheduled_after_done() {
        let queue = DelayedEvictionQueue::new();
        queue.add_after("pod-a", Duration::ZERO);
        assert_eq!(queue.get().await, Some("pod-a"));
        queue.done(&"pod-a");

        assert!(queue.add_after("pod-a", Duration::from_secs(1)));
        assert_eq!(queue.get().await, Some("pod-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn key_due_while_processing_waits_for_done() {
        let queue = DelayedEvictionQueue::new();
        queue.add_after("pod-a", Duration::ZERO);
        assert_eq!(queue.get().await, Some("pod-a"));

        // Re-added while still being processed.
        assert!(queue.add_after("pod-a", Duration::from_secs(1)));
        let blocked = timeout(Duration::from_secs(5), queue.get()).await;
        assert!(blocked.is_err(), "key handed out while still processing");

        queue.done(&"pod-a");
        assert_eq!(queue.get().await, Some("pod-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unblocks_consumer() {
        let queue = Arc::new(DelayedEvictionQueue::<&str>::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        time::sleep(Duration::from_millis(10)).await;

        queue.shutdown();

        let result = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should exit after shutdown")
            .unwrap();
        assert_eq!(result, None);
        assert!(queue.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_ready_and_drops_waiting() {
        let queue = DelayedEvictionQueue::new();
        queue.add_after("ready", Duration::ZERO);
        queue.add_after("waiting", Duration::from_secs(60));

        queue.shutdown();

        assert!(!queue.add_after("new", Duration::ZERO));
        assert_eq!(queue.get().await, Some("ready"));
        assert_eq!(queue.get().await, None);
        assert!(queue.is_empty());
    }
}
