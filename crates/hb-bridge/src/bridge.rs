//! The `Bridge` facade: wires session, caches, awaiters, send queue,
//! dispatcher, and push pipeline into one value the HTTP layer drives.
//! Owns the router task that turns parsed wire replies into awaiter
//! resolutions, bare-FIFO attribution, and push-pipeline triggers.

use crate::awaiter::{AwaiterRegistry, BareFifo};
use crate::cache::{LoadCache, LoadRecord, PushStateStore, SwitchCache, SwitchRecord};
use crate::config::{Config, ServerTarget};
use crate::dispatcher::{Dispatcher, LoadReadOpts, LoadReadResult, SwitchReadOpts, SwitchReadResult};
use crate::error::BridgeError;
use crate::push_pipeline::PushPipeline;
use crate::queue::{run_pumper, SendQueue};
use crate::session::{self, SessionEvent, SessionHandle};
use crate::whitelist::Whitelist;
use hb_protocol::{parse_line, LoadAddr, Reply, SwitchAddr};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct BridgeStatus {
    pub state: ConnectionState,
    pub connected_to: Option<ServerTarget>,
    pub parse_failures: u64,
    pub switch_cache_len: usize,
    pub load_cache_len: usize,
    pub whitelist_len: usize,
    pub queue_depth: usize,
}

struct RunningSession {
    handle: SessionHandle,
    target: ServerTarget,
    router: JoinHandle<()>,
    pumper: JoinHandle<()>,
}

pub struct Bridge {
    pub config: Config,
    pub whitelist: Arc<Whitelist>,
    pub switch_cache: Arc<SwitchCache>,
    pub load_cache: Arc<LoadCache>,
    pub push_states: Arc<PushStateStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub push_pipeline: Arc<PushPipeline>,
    queue: Arc<SendQueue>,
    switch_awaiters: Arc<AwaiterRegistry<SwitchAddr>>,
    load_awaiters: Arc<AwaiterRegistry<LoadAddr>>,
    bare_fifo: Arc<BareFifo<SwitchAddr>>,
    recv_ring: Mutex<VecDeque<String>>,
    parse_failures: AtomicU64,
    state: RwLock<ConnectionState>,
    running: Mutex<Option<RunningSession>>,
    disconnected_notify: Notify,
}

impl Bridge {
    pub fn new(config: Config) -> Arc<Self> {
        let switch_awaiters = Arc::new(AwaiterRegistry::new());
        let load_awaiters = Arc::new(AwaiterRegistry::new());
        let queue = Arc::new(SendQueue::new());
        let switch_cache = Arc::new(SwitchCache::new());
        let load_cache = Arc::new(LoadCache::new());
        let push_states = Arc::new(PushStateStore::new());
        let bare_fifo = Arc::new(BareFifo::new());
        let whitelist = Arc::new(Whitelist::new(HashSet::new(), config.hb_whitelist_strict));

        let dispatcher = Arc::new(Dispatcher::new(
            switch_awaiters.clone(),
            load_awaiters.clone(),
            queue.clone(),
            switch_cache.clone(),
            load_cache.clone(),
            push_states.clone(),
            bare_fifo.clone(),
            config.min_poll_interval(),
            config.push_fresh(),
            config.default_load_fade_seconds,
            config.awaiters_max_per_key,
            config.load_awaiters_max_per_key,
        ));

        let push_pipeline = Arc::new(PushPipeline::new(
            whitelist.clone(),
            switch_awaiters.clone(),
            queue.clone(),
            push_states.clone(),
            switch_cache.clone(),
            config.awaiters_max_per_key,
            config.debounce(),
        ));

        Arc::new(Bridge {
            config,
            whitelist,
            switch_cache,
            load_cache,
            push_states,
            dispatcher,
            push_pipeline,
            queue,
            switch_awaiters,
            load_awaiters,
            bare_fifo,
            recv_ring: Mutex::new(VecDeque::new()),
            parse_failures: AtomicU64::new(0),
            state: RwLock::new(ConnectionState::Disconnected),
            running: Mutex::new(None),
            disconnected_notify: Notify::new(),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn status(&self) -> BridgeStatus {
        let running = self.running.lock().await;
        BridgeStatus {
            state: *self.state.read().await,
            connected_to: running.as_ref().map(|r| r.target.clone()),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            switch_cache_len: self.switch_cache.len(),
            load_cache_len: self.load_cache.len(),
            whitelist_len: self.whitelist.len(),
            queue_depth: self.queue.len(),
        }
    }

    /// Connect to `target`, replacing any existing session.
    pub async fn connect(self: &Arc<Self>, target: ServerTarget) -> Result<(), BridgeError> {
        self.disconnect().await;
        *self.state.write().await = ConnectionState::Connecting;

        let addr: SocketAddr = format!("{}:{}", target.host, target.port)
            .parse()
            .map_err(|e| BridgeError::InvalidInput(format!("bad server address: {e}")))?;

        let handshake_retry = if self.config.handshake_retry_ms > 0 {
            Some(Duration::from_millis(self.config.handshake_retry_ms))
        } else {
            None
        };

        let connect_result = session::connect(
            addr,
            self.config.handshake.as_bytes(),
            handshake_retry,
            self.config.recv_ring_max,
        )
        .await;

        let (handle, events) = match connect_result {
            Ok(pair) => pair,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let min_gap = self.config.min_gap();
        let line_ending = self.config.line_ending;
        let pumper_handle = handle.clone();
        let queue = self.queue.clone();
        let pumper = tokio::spawn(async move {
            run_pumper(&queue, min_gap, |item| {
                let handle = pumper_handle.clone();
                async move {
                    let mut bytes = item.bytes;
                    bytes.extend_from_slice(line_ending.as_bytes());
                    if let Err(e) = handle.write_bytes(&bytes).await {
                        warn!(label = item.label, error = %e, "send queue write failed");
                    }
                }
            })
            .await;
        });

        let bridge = self.clone();
        let router = tokio::spawn(async move { bridge.run_router(events).await });

        *self.running.lock().await = Some(RunningSession {
            handle,
            target: target.clone(),
            router,
            pumper,
        });
        *self.state.write().await = ConnectionState::Connected;
        info!(server = %target.name, "bridge connected");
        Ok(())
    }

    /// Tear down the active session, if any: abort background tasks,
    /// clear the bare-FIFO, cancel push-pipeline timers, and reject every
    /// pending awaiter with `Disconnected`.
    pub async fn disconnect(&self) {
        let mut running = self.running.lock().await;
        if let Some(session) = running.take() {
            session.router.abort();
            session.pumper.abort();
        }
        drop(running);

        self.bare_fifo.clear().await;
        self.push_pipeline.cancel_all().await;
        self.switch_awaiters
            .cancel_all(BridgeError::Disconnected)
            .await;
        self.load_awaiters
            .cancel_all(BridgeError::Disconnected)
            .await;
        self.recv_ring.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
        self.disconnected_notify.notify_one();
    }

    /// Resolve once the session transitions to disconnected (used by the
    /// reconnect supervisor to know when to retry).
    pub async fn wait_for_disconnect(&self) {
        self.disconnected_notify.notified().await;
    }

    pub async fn switch_read(
        &self,
        addr: SwitchAddr,
        opts: SwitchReadOpts,
    ) -> Result<SwitchReadResult, BridgeError> {
        if self.state().await != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.dispatcher.switch_read(addr, opts).await
    }

    pub async fn switch_write(
        &self,
        addr: SwitchAddr,
        value: bool,
        wait: Option<Duration>,
    ) -> Result<Option<String>, BridgeError> {
        if self.state().await != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.dispatcher.switch_write(addr, value, wait).await
    }

    pub async fn load_read(
        &self,
        addr: LoadAddr,
        opts: LoadReadOpts,
    ) -> Result<LoadReadResult, BridgeError> {
        if self.state().await != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.dispatcher.load_read(addr, opts).await
    }

    /// Returns the command line that was queued, for callers that surface
    /// it back to clients (e.g. `X-Load-Command`).
    pub async fn load_set(
        &self,
        addr: LoadAddr,
        level: u8,
        fade_seconds: Option<u32>,
    ) -> Result<String, BridgeError> {
        if self.state().await != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }
        self.dispatcher.load_set(addr, level, fade_seconds).await
    }

    pub async fn recv_snapshot(&self) -> Vec<String> {
        self.recv_ring.lock().await.iter().cloned().collect()
    }

    pub async fn recv_reset(&self) {
        self.recv_ring.lock().await.clear();
    }

    async fn run_router(self: Arc<Self>, mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Line(raw) => self.handle_line(raw).await,
                SessionEvent::Closed => {
                    info!("session closed by peer");
                    break;
                }
                SessionEvent::ReadError(e) => {
                    error!(error = %e, "session read error");
                    break;
                }
            }
        }
        self.disconnect().await;
    }

    async fn handle_line(&self, raw: String) {
        self.dispatcher.publish_raw_line(&raw);
        {
            let mut ring = self.recv_ring.lock().await;
            ring.push_back(raw.clone());
            while ring.len() > self.config.recv_ring_max {
                ring.pop_front();
            }
        }

        let replies = match parse_line(&raw) {
            Ok(replies) => replies,
            Err(e) => {
                self.parse_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = ?e, raw, "failed to parse incoming line");
                return;
            }
        };

        let now = tokio::time::Instant::now();
        for reply in replies {
            match reply {
                Reply::SwitchReply { addr, value, .. } => {
                    self.bare_fifo.remove(&addr).await;
                    self.switch_cache.put(
                        addr,
                        SwitchRecord {
                            value,
                            raw: raw.clone(),
                            ts: now,
                            bytes: raw.len(),
                            source: "tcp-await",
                        },
                    );
                    self.switch_awaiters.resolve(&addr, raw.clone()).await;
                }
                Reply::LoadReply {
                    addr, level, fade, ..
                } => {
                    self.load_cache.put(
                        addr,
                        LoadRecord {
                            level,
                            fade,
                            raw: raw.clone(),
                            ts: now,
                            bytes: raw.len(),
                            source: "tcp-await",
                        },
                    );
                    self.load_awaiters.resolve(&addr, raw.clone()).await;
                }
                Reply::PushEvent { addr, value } => {
                    self.push_pipeline.handle_push_event(addr, value).await;
                }
                Reply::BareState { value } => {
                    if let Some(addr) = self.bare_fifo.pop_front().await {
                        let synthetic =
                            format!("RGS# {} {} {} {}", addr.master, addr.station, addr.button, u8::from(value));
                        self.switch_cache.put(
                            addr,
                            SwitchRecord {
                                value,
                                raw: synthetic.clone(),
                                ts: now,
                                bytes: raw.len(),
                                source: "bare",
                            },
                        );
                        self.switch_awaiters.resolve(&addr, synthetic).await;
                    } else {
                        warn!(raw, "bare reply with no outstanding switch request to attribute it to");
                    }
                }
            }
        }
    }
}
