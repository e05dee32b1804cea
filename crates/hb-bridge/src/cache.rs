//! Read-coalescing caches: `SwitchCache`, `LoadCache`, and
//! the `PushState` store written only by the push pipeline.
//!
//! Entries are created on first observation and overwritten in place; no
//! TTL eviction, only freshness checks at read time. A stale write never
//! overwrites a fresher record.

use hb_protocol::{LoadAddr, SwitchAddr};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SwitchRecord {
    pub value: bool,
    pub raw: String,
    pub ts: Instant,
    pub bytes: usize,
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct LoadRecord {
    pub level: u8,
    pub fade: Option<f64>,
    pub raw: String,
    pub ts: Instant,
    pub bytes: usize,
    pub source: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct PushState {
    pub value: bool,
    pub ts: Instant,
}

impl SwitchRecord {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.ts)
    }
}

impl PushState {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.ts)
    }
}

#[derive(Default)]
pub struct SwitchCache {
    inner: RwLock<HashMap<SwitchAddr, SwitchRecord>>,
}

impl SwitchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: SwitchAddr) -> Option<SwitchRecord> {
        self.inner.read().unwrap().get(&addr).cloned()
    }

    /// Insert `record`, but only if `record.ts` is not older than whatever is
    /// already cached for `addr` (monotonic-ts invariant).
    pub fn put(&self, addr: SwitchAddr, record: SwitchRecord) {
        let mut inner = self.inner.write().unwrap();
        match inner.get(&addr) {
            Some(existing) if record.ts < existing.ts => {}
            _ => {
                inner.insert(addr, record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct LoadCache {
    inner: RwLock<HashMap<LoadAddr, LoadRecord>>,
}

impl LoadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: LoadAddr) -> Option<LoadRecord> {
        self.inner.read().unwrap().get(&addr).cloned()
    }

    pub fn put(&self, addr: LoadAddr, record: LoadRecord) {
        let mut inner = self.inner.write().unwrap();
        match inner.get(&addr) {
            Some(existing) if record.ts < existing.ts => {}
            _ => {
                inner.insert(addr, record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct PushStateStore {
    inner: RwLock<HashMap<SwitchAddr, PushState>>,
}

impl PushStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: SwitchAddr) -> Option<PushState> {
        self.inner.read().unwrap().get(&addr).copied()
    }

    pub fn set(&self, addr: SwitchAddr, state: PushState) {
        self.inner.write().unwrap().insert(addr, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(value: bool, ts: Instant) -> SwitchRecord {
        SwitchRecord {
            value,
            raw: "raw".to_owned(),
            ts,
            bytes: 3,
            source: "tcp-await",
        }
    }

    #[tokio::test(start_paused = true)]
    async fn newer_ts_overwrites_older() {
        let cache = SwitchCache::new();
        let addr = SwitchAddr::new(2, 20, 7);
        let t0 = Instant::now();
        cache.put(addr, rec(false, t0));
        tokio::time::advance(Duration::from_millis(10)).await;
        let t1 = Instant::now();
        cache.put(addr, rec(true, t1));
        assert!(cache.get(addr).unwrap().value);
        assert_eq!(cache.get(addr).unwrap().ts, t1);
    }

    #[tokio::test(start_paused = true)]
    async fn older_ts_never_overwrites_newer() {
        let cache = SwitchCache::new();
        let addr = SwitchAddr::new(2, 20, 7);
        let t0 = Instant::now();
        tokio::time::advance(Duration::from_millis(10)).await;
        let t1 = Instant::now();
        cache.put(addr, rec(true, t1));
        cache.put(addr, rec(false, t0));
        assert!(cache.get(addr).unwrap().value, "stale write must not win");
        assert_eq!(cache.get(addr).unwrap().ts, t1);
    }

    #[test]
    fn get_on_unknown_key_returns_none() {
        let cache = SwitchCache::new();
        assert!(cache.get(SwitchAddr::new(1, 1, 1)).is_none());
        let loads = LoadCache::new();
        assert!(loads.get(LoadAddr::new(1, 1, 1, 1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn push_state_store_set_and_get() {
        let store = PushStateStore::new();
        let addr = SwitchAddr::new(2, 20, 7);
        assert!(store.get(addr).is_none());
        store.set(addr, PushState { value: true, ts: Instant::now() });
        assert!(store.get(addr).unwrap().value);
    }
}
