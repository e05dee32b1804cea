//! Awaiter registry and the bare-reply FIFO.
//!
//! Each key (`SwitchAddr` or `LoadAddr`) maps to an ordered list of pending
//! one-shot waiters. A successful reply resolves and drains the whole list
//! (broadcast); disconnect rejects every pending awaiter with
//! [`BridgeError::Disconnected`] and no awaiter ever leaks.

use crate::error::BridgeError;
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

type Waiter = (u64, oneshot::Sender<Result<String, BridgeError>>);

/// A registered-but-not-yet-awaited slot, returned by [`AwaiterRegistry::register`].
pub struct AwaiterTicket {
    id: u64,
    rx: oneshot::Receiver<Result<String, BridgeError>>,
}

/// Per-key list of pending one-shot waiters, with a hard cap per key.
pub struct AwaiterRegistry<K: Eq + Hash + Clone + Display> {
    inner: Mutex<HashMap<K, Vec<Waiter>>>,
    next_id: AtomicU64,
}

impl<K: Eq + Hash + Clone + Display> Default for AwaiterRegistry<K> {
    fn default() -> Self {
        AwaiterRegistry {
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone + Display> AwaiterRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an awaiter and wait for it to resolve, reject on deadline,
    /// or reject on disconnect.
    pub async fn wait(
        &self,
        key: K,
        deadline: Instant,
        max_per_key: usize,
    ) -> Result<String, BridgeError> {
        let ticket = self.register(key.clone(), max_per_key).await?;
        self.await_ticket(key, ticket, deadline).await
    }

    /// Register an awaiter for `key` and hand back a ticket without
    /// waiting on it. Callers that need to issue a write only *after* the
    /// awaiter is in place (register before send, never the
    /// reverse) should call this, send, then [`Self::await_ticket`].
    pub async fn register(&self, key: K, max_per_key: usize) -> Result<AwaiterTicket, BridgeError> {
        let mut map = self.inner.lock().await;
        let list = map.entry(key.clone()).or_default();
        if list.len() >= max_per_key {
            return Err(BridgeError::AwaitersSaturated(key.to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        list.push((id, tx));
        Ok(AwaiterTicket { id, rx })
    }

    /// Wait on a ticket obtained from [`Self::register`], rejecting on
    /// `deadline` and removing the ticket from the registry if it fires.
    pub async fn await_ticket(
        &self,
        key: K,
        ticket: AwaiterTicket,
        deadline: Instant,
    ) -> Result<String, BridgeError> {
        let AwaiterTicket { id, rx } = ticket;
        tokio::select! {
            res = rx => res.unwrap_or(Err(BridgeError::Disconnected)),
            () = tokio::time::sleep_until(deadline) => {
                let mut map = self.inner.lock().await;
                if let Some(list) = map.get_mut(&key) {
                    list.retain(|(i, _)| *i != id);
                }
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Resolve and drain every awaiter currently registered for `key`.
    pub async fn resolve(&self, key: &K, raw: String) {
        let list = {
            let mut map = self.inner.lock().await;
            map.remove(key).unwrap_or_default()
        };
        for (_, tx) in list {
            let _ = tx.send(Ok(raw.clone()));
        }
    }

    /// Reject and drain every awaiter currently registered for `key`.
    pub async fn reject(&self, key: &K, err: BridgeError) {
        let list = {
            let mut map = self.inner.lock().await;
            map.remove(key).unwrap_or_default()
        };
        for (_, tx) in list {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Reject every awaiter for every key (session teardown).
    pub async fn cancel_all(&self, err: BridgeError) {
        let all = {
            let mut map = self.inner.lock().await;
            std::mem::take(&mut *map)
        };
        for (_, list) in all {
            for (_, tx) in list {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    pub async fn len_for(&self, key: &K) -> usize {
        self.inner.lock().await.get(key).map_or(0, Vec::len)
    }
}

/// FIFO of keys whose reply might arrive as a bare `0|1` with no address.
pub struct BareFifo<K: Eq + Clone> {
    inner: Mutex<VecDeque<K>>,
}

impl<K: Eq + Clone> Default for BareFifo<K> {
    fn default() -> Self {
        BareFifo {
            inner: Mutex::new(VecDeque::new()),
        }
    }
}

impl<K: Eq + Clone> BareFifo<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, key: K) {
        self.inner.lock().await.push_back(key);
    }

    pub async fn pop_front(&self) -> Option<K> {
        self.inner.lock().await.pop_front()
    }

    /// Remove the first occurrence of `key`, if present (used when a
    /// switch reply for `key` arrives normally before any bare reply did).
    pub async fn remove(&self, key: &K) {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.iter().position(|k| k == key) {
            inner.remove(pos);
        }
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
