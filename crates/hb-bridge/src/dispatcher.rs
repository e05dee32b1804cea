//! Core request operations: `SwitchRead`, `SwitchWrite`,
//! `LoadSet`, `LoadRead`, `RawSend`. Each operation tries the fastest
//! source first (push state, then cache), coalesces concurrent reads for
//! the same address onto a single in-flight request, and falls back to a
//! stale cache entry (flagged) when the controller doesn't answer in time.

use crate::awaiter::{AwaiterRegistry, BareFifo};
use crate::cache::{LoadCache, LoadRecord, PushStateStore, SwitchCache, SwitchRecord};
use crate::error::BridgeError;
use crate::queue::{SendQueue, PRIORITY_READ, PRIORITY_WRITE};
use hb_protocol::{command, parse_line, LoadAddr, Reply, SwitchAddr};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{Duration, Instant};
use tracing::warn;

const READ_MAX_WAIT: Duration = Duration::from_millis(2_000);
const WRITE_ACK_MAX_WAIT: Duration = Duration::from_millis(2_000);
/// Default randomized delay before issuing a brand-new read, to avoid a
/// thundering herd of simultaneous pollers lining up on the same gap slot.
const JITTER_MAX_MS: u64 = 20;
const RAW_LINE_CHANNEL_CAPACITY: usize = 256;

/// Per-request overrides for `SwitchRead`. `None` fields fall back to the
/// dispatcher's configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchReadOpts {
    pub cache_ms: Option<Duration>,
    pub max_ms: Option<Duration>,
    pub jitter_ms: Option<u64>,
}

/// Per-request overrides for `LoadRead`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadReadOpts {
    pub cache_ms: Option<Duration>,
    pub max_ms: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchReadResult {
    pub value: bool,
    pub source: &'static str,
    pub stale: bool,
    /// "cache-hit" | "stream" | "miss" | "stale-cache"
    pub cache_state: &'static str,
    pub age_ms: u64,
    pub raw: Option<String>,
    pub note: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReadResult {
    pub level: u8,
    pub fade: Option<f64>,
    pub source: &'static str,
    pub stale: bool,
    pub cache_state: &'static str,
    pub age_ms: u64,
}

pub struct Dispatcher {
    switch_awaiters: Arc<AwaiterRegistry<SwitchAddr>>,
    load_awaiters: Arc<AwaiterRegistry<LoadAddr>>,
    queue: Arc<SendQueue>,
    switch_cache: Arc<SwitchCache>,
    load_cache: Arc<LoadCache>,
    push_states: Arc<PushStateStore>,
    bare_fifo: Arc<BareFifo<SwitchAddr>>,
    raw_lines: broadcast::Sender<String>,
    switch_in_flight: Mutex<HashSet<SwitchAddr>>,
    load_in_flight: Mutex<HashSet<LoadAddr>>,
    min_poll_interval: Duration,
    push_fresh: Duration,
    default_load_fade_seconds: u32,
    awaiters_max_per_key: usize,
    load_awaiters_max_per_key: usize,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        switch_awaiters: Arc<AwaiterRegistry<SwitchAddr>>,
        load_awaiters: Arc<AwaiterRegistry<LoadAddr>>,
        queue: Arc<SendQueue>,
        switch_cache: Arc<SwitchCache>,
        load_cache: Arc<LoadCache>,
        push_states: Arc<PushStateStore>,
        bare_fifo: Arc<BareFifo<SwitchAddr>>,
        min_poll_interval: Duration,
        push_fresh: Duration,
        default_load_fade_seconds: u32,
        awaiters_max_per_key: usize,
        load_awaiters_max_per_key: usize,
    ) -> Self {
        let (raw_lines, _) = broadcast::channel(RAW_LINE_CHANNEL_CAPACITY);
        Dispatcher {
            switch_awaiters,
            load_awaiters,
            queue,
            switch_cache,
            load_cache,
            push_states,
            bare_fifo,
            raw_lines,
            switch_in_flight: Mutex::new(HashSet::new()),
            load_in_flight: Mutex::new(HashSet::new()),
            min_poll_interval,
            push_fresh,
            default_load_fade_seconds,
            awaiters_max_per_key,
            load_awaiters_max_per_key,
        }
    }

    /// Router hook: publish every raw line seen on the wire so `RawSend`
    /// collection windows can observe it, independent of line parsing.
    pub fn publish_raw_line(&self, raw: &str) {
        let _ = self.raw_lines.send(raw.to_owned());
    }

    pub async fn switch_read(
        &self,
        addr: SwitchAddr,
        opts: SwitchReadOpts,
    ) -> Result<SwitchReadResult, BridgeError> {
        let now = Instant::now();
        let cache_ms = opts.cache_ms.unwrap_or(self.min_poll_interval);
        let max_ms = opts.max_ms.unwrap_or(READ_MAX_WAIT);
        let jitter_ms = opts.jitter_ms.unwrap_or(JITTER_MAX_MS);

        if let Some(state) = self.push_states.get(addr) {
            if state.age(now) <= self.push_fresh {
                return Ok(SwitchReadResult {
                    value: state.value,
                    source: "push-state",
                    stale: false,
                    cache_state: "cache-hit",
                    age_ms: state.age(now).as_millis() as u64,
                    raw: None,
                    note: None,
                });
            }
        }

        if let Some(rec) = self.switch_cache.get(addr) {
            if rec.age(now) <= cache_ms {
                return Ok(SwitchReadResult {
                    value: rec.value,
                    source: "cache",
                    stale: false,
                    cache_state: "cache-hit",
                    age_ms: rec.age(now).as_millis() as u64,
                    raw: Some(rec.raw),
                    note: None,
                });
            }
        }

        let joined = {
            let mut in_flight = self.switch_in_flight.lock().await;
            !in_flight.insert(addr)
        };

        let deadline = now + max_ms;
        let ticket = self
            .switch_awaiters
            .register(addr, self.awaiters_max_per_key)
            .await?;

        if !joined {
            jitter(jitter_ms).await;
            self.bare_fifo.push(addr).await;
            self.queue.push(
                command::switch_read(addr).into_bytes(),
                PRIORITY_READ,
                "switch-read",
            );
        }

        let result = self.switch_awaiters.await_ticket(addr, ticket, deadline).await;
        if !joined {
            self.switch_in_flight.lock().await.remove(&addr);
        }

        match result {
            Ok(raw) => match find_switch_reply(&raw, addr) {
                Some(value) => {
                    self.switch_cache.put(
                        addr,
                        SwitchRecord {
                            value,
                            raw: raw.clone(),
                            ts: Instant::now(),
                            bytes: 0,
                            source: "tcp-await",
                        },
                    );
                    Ok(SwitchReadResult {
                        value,
                        source: "tcp-await",
                        stale: false,
                        cache_state: if joined { "stream" } else { "miss" },
                        age_ms: 0,
                        raw: Some(raw),
                        note: if joined {
                            Some("joined in-flight request")
                        } else {
                            None
                        },
                    })
                }
                None => {
                    warn!(%addr, raw, "switch read reply did not match expected address");
                    self.stale_switch_fallback(addr)
                        .unwrap_or(Err(BridgeError::InvalidInput(
                            "reply did not match requested address".into(),
                        )))
                }
            },
            Err(e) => self.stale_switch_fallback(addr).unwrap_or(Err(e)),
        }
    }

    fn stale_switch_fallback(&self, addr: SwitchAddr) -> Option<Result<SwitchReadResult, BridgeError>> {
        let now = Instant::now();
        self.switch_cache.get(addr).map(|rec| {
            Ok(SwitchReadResult {
                value: rec.value,
                source: "cache",
                stale: true,
                cache_state: "stale-cache",
                age_ms: rec.age(now).as_millis() as u64,
                raw: Some(rec.raw),
                note: Some("served from stale cache after timeout"),
            })
        })
    }

    pub async fn switch_write(
        &self,
        addr: SwitchAddr,
        state: bool,
        wait: Option<Duration>,
    ) -> Result<Option<String>, BridgeError> {
        let line = command::switch_write(addr, state);

        if let Some(wait) = wait {
            let ticket = self
                .switch_awaiters
                .register(addr, self.awaiters_max_per_key)
                .await?;
            self.queue
                .push(line.into_bytes(), PRIORITY_WRITE, "switch-write");
            let deadline = Instant::now() + wait.min(WRITE_ACK_MAX_WAIT);
            let raw = self.switch_awaiters.await_ticket(addr, ticket, deadline).await?;
            if let Some(value) = find_switch_reply(&raw, addr) {
                self.switch_cache.put(
                    addr,
                    SwitchRecord {
                        value,
                        raw: raw.clone(),
                        ts: Instant::now(),
                        bytes: 0,
                        source: "tcp-await",
                    },
                );
            }
            Ok(Some(raw))
        } else {
            self.queue
                .push(line.into_bytes(), PRIORITY_WRITE, "switch-write");
            Ok(None)
        }
    }

    pub async fn load_read(
        &self,
        addr: LoadAddr,
        opts: LoadReadOpts,
    ) -> Result<LoadReadResult, BridgeError> {
        let now = Instant::now();
        let cache_ms = opts.cache_ms.unwrap_or(self.min_poll_interval);
        let max_ms = opts.max_ms.unwrap_or(READ_MAX_WAIT);

        if let Some(rec) = self.load_cache.get(addr) {
            if rec.age(now) <= cache_ms {
                return Ok(LoadReadResult {
                    level: rec.level,
                    fade: rec.fade,
                    source: "cache",
                    stale: false,
                    cache_state: "cache-hit",
                    age_ms: rec.age(now).as_millis() as u64,
                });
            }
        }

        let joined = {
            let mut in_flight = self.load_in_flight.lock().await;
            !in_flight.insert(addr)
        };

        let deadline = now + max_ms;
        let ticket = self
            .load_awaiters
            .register(addr, self.load_awaiters_max_per_key)
            .await?;

        if !joined {
            jitter(JITTER_MAX_MS).await;
            self.queue.push(
                command::load_read(addr).into_bytes(),
                PRIORITY_READ,
                "load-read",
            );
        }

        let result = self.load_awaiters.await_ticket(addr, ticket, deadline).await;
        if !joined {
            self.load_in_flight.lock().await.remove(&addr);
        }

        match result {
            Ok(raw) => match find_load_reply(&raw, addr) {
                Some((level, fade)) => {
                    self.load_cache.put(
                        addr,
                        LoadRecord {
                            level,
                            fade,
                            raw,
                            ts: Instant::now(),
                            bytes: 0,
                            source: "tcp-await",
                        },
                    );
                    Ok(LoadReadResult {
                        level,
                        fade,
                        source: "tcp-await",
                        stale: false,
                        cache_state: if joined { "stream" } else { "miss" },
                        age_ms: 0,
                    })
                }
                None => self
                    .stale_load_fallback(addr)
                    .unwrap_or(Err(BridgeError::InvalidInput(
                        "reply did not match requested address".into(),
                    ))),
            },
            Err(e) => self.stale_load_fallback(addr).unwrap_or(Err(e)),
        }
    }

    fn stale_load_fallback(&self, addr: LoadAddr) -> Option<Result<LoadReadResult, BridgeError>> {
        let now = Instant::now();
        self.load_cache.get(addr).map(|rec| {
            Ok(LoadReadResult {
                level: rec.level,
                fade: rec.fade,
                source: "cache",
                stale: true,
                cache_state: "stale-cache",
                age_ms: rec.age(now).as_millis() as u64,
            })
        })
    }

    pub async fn load_set(
        &self,
        addr: LoadAddr,
        level: u8,
        fade_seconds: Option<u32>,
    ) -> Result<String, BridgeError> {
        if level > 100 {
            return Err(BridgeError::InvalidInput(format!(
                "load level {level} out of range 0..=100"
            )));
        }
        let fade = fade_seconds.unwrap_or(self.default_load_fade_seconds);
        let line = command::load_set(addr, level, Some(fade));
        self.queue
            .push(line.clone().into_bytes(), PRIORITY_WRITE, "load-set");
        Ok(line)
    }

    /// Send raw bytes and collect whatever raw lines arrive during the
    /// window: either a fixed `wait` duration, or `quiet`; reset on every
    /// new line, firing once the wire goes silent for that long.
    pub async fn raw_send(
        &self,
        bytes: Vec<u8>,
        wait: Option<Duration>,
        quiet: Option<Duration>,
    ) -> Vec<String> {
        let mut rx = self.raw_lines.subscribe();
        self.queue.push(bytes, PRIORITY_WRITE, "raw-send");

        let mut collected = Vec::new();
        match (wait, quiet) {
            (Some(wait), _) => {
                let deadline = Instant::now() + wait;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match tokio::time::timeout(remaining, rx.recv()).await {
                        Ok(Ok(line)) => collected.push(line),
                        _ => break,
                    }
                }
            }
            (None, Some(quiet)) => loop {
                match tokio::time::timeout(quiet, rx.recv()).await {
                    Ok(Ok(line)) => collected.push(line),
                    _ => break,
                }
            },
            (None, None) => {}
        }
        collected
    }
}

async fn jitter(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let millis = rand::thread_rng().gen_range(0..=max_ms);
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

fn find_switch_reply(raw: &str, addr: SwitchAddr) -> Option<bool> {
    parse_line(raw).ok()?.into_iter().find_map(|r| match r {
        Reply::SwitchReply { addr: a, value, .. } if a == addr => Some(value),
        _ => None,
    })
}

fn find_load_reply(raw: &str, addr: LoadAddr) -> Option<(u8, Option<f64>)> {
    parse_line(raw).ok()?.into_iter().find_map(|r| match r {
        Reply::LoadReply {
            addr: a,
            level,
            fade,
            ..
        } if a == addr => Some((level, fade)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(AwaiterRegistry::new()),
            Arc::new(AwaiterRegistry::new()),
            Arc::new(SendQueue::new()),
            Arc::new(SwitchCache::new()),
            Arc::new(LoadCache::new()),
            Arc::new(PushStateStore::new()),
            Arc::new(BareFifo::new()),
            Duration::from_millis(400),
            Duration::from_millis(10_000),
            3,
            200,
            200,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn switch_read_serves_fresh_push_state_without_touching_queue() {
        let d = new_dispatcher();
        let addr = SwitchAddr::new(2, 20, 7);
        d.push_states.set(
            addr,
            crate::cache::PushState {
                value: true,
                ts: Instant::now(),
            },
        );
        let result = d.switch_read(addr, SwitchReadOpts::default()).await.unwrap();
        assert_eq!(result.source, "push-state");
        assert!(result.value);
        assert!(d.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switch_read_serves_fresh_cache_when_push_state_stale() {
        let d = new_dispatcher();
        let addr = SwitchAddr::new(2, 20, 7);
        d.switch_cache.put(
            addr,
            SwitchRecord {
                value: false,
                raw: "RGS# 2 20 7 0".into(),
                ts: Instant::now(),
                bytes: 0,
                source: "tcp-await",
            },
        );
        let result = d.switch_read(addr, SwitchReadOpts::default()).await.unwrap();
        assert_eq!(result.source, "cache");
        assert!(!result.value);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_read_issues_new_request_and_resolves() {
        let d = Arc::new(new_dispatcher());
        let addr = SwitchAddr::new(2, 20, 7);
        let d2 = d.clone();
        let reader = tokio::spawn(async move { d2.switch_read(addr, SwitchReadOpts::default()).await });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(Duration::from_millis(JITTER_MAX_MS + 5)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!d.queue.is_empty());

        d.switch_awaiters
            .resolve(&addr, "RGS# 2 20 7 1".to_owned())
            .await;

        let result = reader.await.unwrap().unwrap();
        assert_eq!(result.source, "tcp-await");
        assert!(result.value);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_read_falls_back_to_stale_cache_on_timeout() {
        let d = new_dispatcher();
        let addr = SwitchAddr::new(2, 20, 7);
        d.switch_cache.put(
            addr,
            SwitchRecord {
                value: true,
                raw: "RGS# 2 20 7 1".into(),
                ts: Instant::now() - Duration::from_secs(5),
                bytes: 0,
                source: "tcp-await",
            },
        );
        let result = d.switch_read(addr, SwitchReadOpts::default()).await.unwrap();
        assert!(result.stale);
        assert_eq!(result.source, "cache");
        assert!(result.value);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_read_propagates_timeout_with_no_cache_to_fall_back_on() {
        let d = new_dispatcher();
        let addr = SwitchAddr::new(3, 3, 3);
        let result = d.switch_read(addr, SwitchReadOpts::default()).await;
        assert!(matches!(result, Err(BridgeError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_switch_reads_coalesce_onto_one_request() {
        let d = Arc::new(new_dispatcher());
        let addr = SwitchAddr::new(2, 20, 7);

        let d1 = d.clone();
        let r1 = tokio::spawn(async move { d1.switch_read(addr, SwitchReadOpts::default()).await });
        let d2 = d.clone();
        let r2 = tokio::spawn(async move { d2.switch_read(addr, SwitchReadOpts::default()).await });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(Duration::from_millis(JITTER_MAX_MS + 5)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(d.queue.len(), 1, "only one read should have been queued");

        d.switch_awaiters
            .resolve(&addr, "RGS# 2 20 7 1".to_owned())
            .await;

        assert!(r1.await.unwrap().unwrap().value);
        assert!(r2.await.unwrap().unwrap().value);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_read_honors_per_request_cache_ms_override() {
        let d = new_dispatcher();
        let addr = SwitchAddr::new(2, 20, 7);
        d.switch_cache.put(
            addr,
            SwitchRecord {
                value: true,
                raw: "RGS# 2 20 7 1".into(),
                ts: Instant::now() - Duration::from_millis(500),
                bytes: 0,
                source: "tcp-await",
            },
        );
        // Default min_poll_interval (400ms) would treat this as stale; a
        // caller-supplied cacheMs of 1000ms should still serve it fresh.
        let result = d
            .switch_read(
                addr,
                SwitchReadOpts {
                    cache_ms: Some(Duration::from_millis(1_000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.cache_state, "cache-hit");
        assert!(!result.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn load_set_rejects_out_of_range_level() {
        let d = new_dispatcher();
        let result = d.load_set(LoadAddr::new(1, 1, 1, 1), 101, None).await;
        assert!(matches!(result, Err(BridgeError::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn load_set_uses_default_fade_when_unspecified() {
        let d = new_dispatcher();
        let command = d.load_set(LoadAddr::new(1, 1, 1, 1), 50, None).await.unwrap();
        assert!(command.contains(" 3"), "default fade seconds should be echoed in the command");
        assert!(!d.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switch_write_without_wait_does_not_block() {
        let d = new_dispatcher();
        let addr = SwitchAddr::new(2, 20, 7);
        let result = d.switch_write(addr, true, None).await.unwrap();
        assert!(result.is_none());
        assert!(!d.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switch_write_without_wait_does_not_touch_bare_fifo() {
        let d = new_dispatcher();
        let addr = SwitchAddr::new(2, 20, 7);
        d.switch_write(addr, true, None).await.unwrap();
        assert!(
            d.bare_fifo.is_empty().await,
            "switch_write must never register itself on the bare-FIFO"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn raw_send_collects_lines_within_fixed_window() {
        let d = Arc::new(new_dispatcher());
        let d2 = d.clone();
        let collector = tokio::spawn(async move {
            d2.raw_send(b"PING\r\n".to_vec(), Some(Duration::from_millis(100)), None)
                .await
        });

        tokio::task::yield_now().await;
        d.publish_raw_line("PONG 1");
        d.publish_raw_line("PONG 2");
        tokio::time::advance(Duration::from_millis(150)).await;

        let lines = collector.await.unwrap();
        assert_eq!(lines, vec!["PONG 1".to_owned(), "PONG 2".to_owned()]);
    }
}
