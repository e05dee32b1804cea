//! Auto-connect and reconnect supervisor.
//!
//! On startup, if `auto_connect` is set, dials `servers[auto_connect_index]`
//! and keeps retrying every `auto_connect_retry_ms` after any disconnect,
//! forever, with no backoff ceiling, since the controller side is expected
//! to come back rather than the bridge giving up on it. A configured retry
//! delay of zero means retrying is disabled outright: the supervisor stops
//! after the first disconnect instead of busy-looping with no delay.

use crate::bridge::Bridge;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Runs until the process exits; intended to be spawned as a background
/// task right after `Bridge::new`.
pub async fn run(bridge: Arc<Bridge>) {
    if !bridge.config.auto_connect {
        info!("auto_connect disabled, supervisor idling");
        return;
    }

    let Some(target) = bridge.config.auto_connect_target().cloned() else {
        error!(
            index = bridge.config.auto_connect_index,
            "auto_connect enabled but no server configured at that index"
        );
        return;
    };

    if bridge.config.auto_connect_retry_ms == 0 {
        if let Err(e) = bridge.connect(target.clone()).await {
            warn!(server = %target.name, error = %e, "connect attempt failed, retry disabled (auto_connect_retry_ms=0)");
        } else {
            info!(server = %target.name, "supervisor established connection");
            bridge.wait_for_disconnect().await;
            warn!(server = %target.name, "connection lost, retry disabled (auto_connect_retry_ms=0)");
        }
        return;
    }

    let retry_delay = Duration::from_millis(bridge.config.auto_connect_retry_ms);

    loop {
        match bridge.connect(target.clone()).await {
            Ok(()) => {
                info!(server = %target.name, "supervisor established connection");
                bridge.wait_for_disconnect().await;
                warn!(server = %target.name, "connection lost, will retry");
            }
            Err(e) => {
                warn!(server = %target.name, error = %e, "connect attempt failed, will retry");
            }
        }
        tokio::time::sleep(retry_delay).await;
    }
}
