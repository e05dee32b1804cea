//! The single TCP session to the controller.
//!
//! `Session::connect` dials the controller, disables Nagle, enables TCP
//! keepalive, and sends the handshake line (optionally retried once after
//! `handshake_retry` if the controller stays silent). The returned
//! `SessionHandle` can be written to directly; a background task reads the
//! socket, reassembles lines with [`hb_protocol::LineFramer`], and emits
//! [`SessionEvent`]s until the peer closes or a read error occurs.

use hb_protocol::LineFramer;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_IDLE: StdDuration = StdDuration::from_secs(30);

#[derive(Debug)]
pub enum SessionEvent {
    Line(String),
    Closed,
    ReadError(String),
}

/// A live, writable half of the session. Cheap to clone (an `Arc` wrapper).
#[derive(Clone)]
pub struct SessionHandle {
    write_half: Arc<Mutex<OwnedWriteHalf>>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::NotConnected);
        }
        let mut half = self.write_half.lock().await;
        half.write_all(bytes)
            .await
            .map_err(|e| BridgeError::TransientWriteError(e.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Connect to `addr`, send `handshake`, and spawn the read loop.
///
/// Returns the writable handle plus a receiver for parsed-line events. If
/// `handshake_retry` is `Some(d)` and nothing at all has been read back
/// within `d`, the handshake line is sent exactly once more; the connect
/// itself still succeeds either way (the controller may simply be silent
/// on connect).
pub async fn connect(
    addr: SocketAddr,
    handshake: &[u8],
    handshake_retry: Option<Duration>,
    recv_ring_max: usize,
) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), BridgeError> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| BridgeError::Timeout)?
        .map_err(|e| BridgeError::TransientWriteError(e.to_string()))?;

    stream
        .set_nodelay(true)
        .map_err(|e| BridgeError::TransientWriteError(e.to_string()))?;
    configure_keepalive(&stream);

    let (read_half, write_half) = stream.into_split();
    let write_half = Arc::new(Mutex::new(write_half));
    let closed = Arc::new(AtomicBool::new(false));
    let handle = SessionHandle {
        write_half: write_half.clone(),
        closed: closed.clone(),
    };

    handle.write_bytes(handshake).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_loop(read_half, recv_ring_max, tx, closed.clone()));

    if let Some(retry_after) = handshake_retry {
        let handle_for_retry = handle.clone();
        let handshake = handshake.to_vec();
        let closed_for_retry = closed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retry_after).await;
            if !closed_for_retry.load(Ordering::Acquire) {
                debug!("handshake retry fired, resending handshake line");
                let _ = handle_for_retry.write_bytes(&handshake).await;
            }
        });
    }

    info!(%addr, "session connected");
    Ok((handle, rx))
}

fn configure_keepalive(stream: &TcpStream) {
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "failed to enable TCP keepalive");
    }
}

async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    recv_ring_max: usize,
    tx: mpsc::UnboundedSender<SessionEvent>,
    closed: Arc<AtomicBool>,
) {
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; 4096];
    let mut ring_len = 0usize;

    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                closed.store(true, Ordering::Release);
                let _ = tx.send(SessionEvent::Closed);
                return;
            }
            Ok(n) => {
                ring_len += n;
                if ring_len > recv_ring_max {
                    warn!(recv_ring_max, "receive ring exceeded, dropping session");
                    closed.store(true, Ordering::Release);
                    let _ = tx.send(SessionEvent::ReadError("receive ring overflow".into()));
                    return;
                }
                for line in framer.feed(&chunk[..n]) {
                    ring_len = ring_len.saturating_sub(line.len());
                    if tx.send(SessionEvent::Line(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                closed.store(true, Ordering::Release);
                let _ = tx.send(SessionEvent::ReadError(e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_sends_handshake_and_receives_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"VCL 1 0\r\n");
            sock.write_all(b"RGS# 2 20 7 1\r\n").await.unwrap();
        });

        let (_handle, mut events) = connect(addr, b"VCL 1 0\r\n", None, 32_768)
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::Line(line) => assert_eq!(line, "RGS# 2 20 7 1"),
            other => panic!("unexpected event: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_emits_closed_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.shutdown().await.unwrap();
        });

        let (_handle, mut events) = connect(addr, b"VCL 1 0\r\n", None, 32_768)
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::Closed => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_retry_resends_after_silence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n1 = sock.read(&mut buf).await.unwrap();
            let n2 = sock.read(&mut buf).await.unwrap();
            (n1, n2)
        });

        let (_handle, _events) = connect(addr, b"VCL 1 0\r\n", Some(Duration::from_millis(50)), 32_768)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;
        let (n1, n2) = server.await.unwrap();
        assert!(n1 > 0 && n2 > 0, "handshake should have been resent");
    }
}
