//! Priority send queue and pumper.
//!
//! A single background task drains the queue and writes to the session,
//! never more often than `MIN_GAP_MS` apart. Items are ordered by priority
//! (higher first), ties broken by arrival order (FIFO within a priority).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

/// Priority ladder: writes beat UI-triggered sends, which beat background polls.
pub const PRIORITY_WRITE: i32 = 10;
pub const PRIORITY_UI_SEND: i32 = 5;
pub const PRIORITY_READ: i32 = 0;

pub struct SendItem {
    pub bytes: Vec<u8>,
    pub priority: i32,
    pub label: &'static str,
    sequence: u64,
}

impl PartialEq for SendItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for SendItem {}

impl Ord for SendItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority pops first, and within
        // the same priority the item enqueued *first* pops first; so
        // reverse sequence comparison.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for SendItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered queue with a dedicated notify so the pumper can sleep
/// between drains instead of busy-polling.
pub struct SendQueue {
    heap: Mutex<BinaryHeap<SendItem>>,
    notify: Notify,
    next_sequence: AtomicU64,
}

impl Default for SendQueue {
    fn default() -> Self {
        SendQueue {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_sequence: AtomicU64::new(0),
        }
    }
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: Vec<u8>, priority: i32, label: &'static str) {
        let sequence = self.next_sequence.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap.lock().unwrap().push(SendItem {
            bytes,
            priority,
            label,
            sequence,
        });
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<SendItem> {
        self.heap.lock().unwrap().pop()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next item without removing it from an empty queue.
    async fn wait_for_item(&self) -> SendItem {
        loop {
            if let Some(item) = self.pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

/// Runs the pumper loop: pop the highest-priority item, enforce `min_gap`
/// since the last write, then hand the bytes to `write`. `write` should be
/// cheap and infallible from the pumper's perspective; session-level
/// errors are reported out-of-band via the session's own state, not by
/// blocking the pumper.
pub async fn run_pumper<F, Fut>(queue: &SendQueue, min_gap: Duration, mut write: F)
where
    F: FnMut(SendItem) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut last_write: Option<Instant> = None;
    loop {
        let item = queue.wait_for_item().await;
        if let Some(last) = last_write {
            let earliest = last + min_gap;
            if earliest > Instant::now() {
                tokio::time::sleep_until(earliest).await;
            }
        }
        last_write = Some(Instant::now());
        write(item).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    #[test]
    fn higher_priority_pops_before_lower() {
        let q = SendQueue::new();
        q.push(b"read".to_vec(), PRIORITY_READ, "read");
        q.push(b"write".to_vec(), PRIORITY_WRITE, "write");
        q.push(b"ui".to_vec(), PRIORITY_UI_SEND, "ui");
        assert_eq!(q.pop().unwrap().label, "write");
        assert_eq!(q.pop().unwrap().label, "ui");
        assert_eq!(q.pop().unwrap().label, "read");
    }

    #[test]
    fn same_priority_is_fifo() {
        let q = SendQueue::new();
        q.push(b"a".to_vec(), PRIORITY_READ, "a");
        q.push(b"b".to_vec(), PRIORITY_READ, "b");
        q.push(b"c".to_vec(), PRIORITY_READ, "c");
        assert_eq!(q.pop().unwrap().label, "a");
        assert_eq!(q.pop().unwrap().label, "b");
        assert_eq!(q.pop().unwrap().label, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn pumper_enforces_min_gap_between_writes() {
        let queue = Arc::new(SendQueue::new());
        let written: Arc<AsyncMutex<Vec<(Instant, &'static str)>>> =
            Arc::new(AsyncMutex::new(Vec::new()));

        queue.push(b"one".to_vec(), PRIORITY_WRITE, "one");
        queue.push(b"two".to_vec(), PRIORITY_WRITE, "two");

        let queue2 = queue.clone();
        let written2 = written.clone();
        let pumper = tokio::spawn(async move {
            run_pumper(&queue2, Duration::from_millis(120), |item| {
                let written = written2.clone();
                async move {
                    written.lock().await.push((Instant::now(), item.label));
                }
            })
            .await;
        });

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        let log = written.lock().await;
        assert_eq!(log.len(), 2);
        assert!(log[1].0.duration_since(log[0].0) >= Duration::from_millis(120));
        pumper.abort();
    }
}
