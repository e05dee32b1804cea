//! Unsolicited push-event pipeline.
//!
//! A `PushEvent` from the controller only updates bridge state after it
//! survives the whitelist gate and a confirm-read round trip; the push
//! line itself is never trusted as truth, only as a trigger. Debounce:
//! `v=0` events confirm after a short fixed delay, `v=1` events wait out
//! the full debounce window in case more pushes for the same address
//! follow immediately.
//!
//! This module talks to the awaiter registry and send queue directly
//! instead of going through the dispatcher, so it can issue its own
//! confirm-read without routing through (and being satisfied by) the
//! dispatcher's cache fast path.

use crate::awaiter::AwaiterRegistry;
use crate::cache::{PushState, PushStateStore, SwitchCache, SwitchRecord};
use crate::queue::{SendQueue, PRIORITY_READ};
use crate::whitelist::Whitelist;
use hb_protocol::{command, parse_line, Reply, SwitchAddr};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

const CONFIRM_FRESH_ZERO_DELAY: Duration = Duration::from_millis(60);
const CONFIRM_MAX_WAIT: Duration = Duration::from_millis(2_000);

pub struct PushPipeline {
    whitelist: Arc<Whitelist>,
    awaiters: Arc<AwaiterRegistry<SwitchAddr>>,
    queue: Arc<SendQueue>,
    push_states: Arc<PushStateStore>,
    switch_cache: Arc<SwitchCache>,
    awaiters_max_per_key: usize,
    debounce: Duration,
    timers: Mutex<HashMap<SwitchAddr, JoinHandle<()>>>,
}

impl PushPipeline {
    pub fn new(
        whitelist: Arc<Whitelist>,
        awaiters: Arc<AwaiterRegistry<SwitchAddr>>,
        queue: Arc<SendQueue>,
        push_states: Arc<PushStateStore>,
        switch_cache: Arc<SwitchCache>,
        awaiters_max_per_key: usize,
        debounce: Duration,
    ) -> Self {
        PushPipeline {
            whitelist,
            awaiters,
            queue,
            push_states,
            switch_cache,
            awaiters_max_per_key,
            debounce,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Handle a raw `PushEvent` observed on the wire.
    pub async fn handle_push_event(self: &Arc<Self>, addr: SwitchAddr, value: bool) {
        if !self.whitelist.contains(addr) {
            debug!(%addr, "push event dropped: not whitelisted");
            return;
        }

        let delay = if value {
            self.debounce
        } else {
            CONFIRM_FRESH_ZERO_DELAY
        };

        let mut timers = self.timers.lock().await;
        if let Some(existing) = timers.remove(&addr) {
            existing.abort();
        }

        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pipeline.confirm(addr).await;
        });
        timers.insert(addr, handle);
    }

    async fn confirm(&self, addr: SwitchAddr) {
        let ticket = match self.awaiters.register(addr, self.awaiters_max_per_key).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(%addr, error = %e, "push confirm-read could not register an awaiter, leaving state untouched");
                return;
            }
        };

        let line = command::switch_read(addr);
        self.queue
            .push(line.into_bytes(), PRIORITY_READ, "push-confirm");

        let deadline = Instant::now() + CONFIRM_MAX_WAIT;
        let raw = match self.awaiters.await_ticket(addr, ticket, deadline).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%addr, error = %e, "push confirm-read failed, leaving state untouched");
                return;
            }
        };

        let replies = match parse_line(&raw) {
            Ok(replies) => replies,
            Err(e) => {
                warn!(%addr, error = ?e, raw, "push confirm-read reply did not parse");
                return;
            }
        };

        let Some(Reply::SwitchReply { value, .. }) =
            replies.into_iter().find(|r| matches!(r, Reply::SwitchReply { addr: a, .. } if *a == addr))
        else {
            warn!(%addr, raw, "push confirm-read reply missing matching switch reply");
            return;
        };

        let now = Instant::now();
        self.push_states.set(addr, PushState { value, ts: now });
        self.switch_cache.put(
            addr,
            SwitchRecord {
                value,
                raw,
                ts: now,
                bytes: 0,
                source: "push-confirm",
            },
        );
    }

    /// Abort every in-flight debounce/confirm timer (session teardown).
    pub async fn cancel_all(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
