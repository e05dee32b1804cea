use bridge::config::load_config_from_path;
use bridge::http::{router, AppState};
use bridge::whitelist_loader::load_whitelist_from_path;
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("hb-bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value("/etc/hb-bridge/bridge.toml"),
        )
        .get_matches();

    let config_path = PathBuf::from(matches.get_one::<String>("config").unwrap());

    let service_config = match load_config_from_path(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %config_path.display(), "failed to load config");
            std::process::exit(1);
        }
    };

    let whitelist_path = service_config.whitelist_path.as_ref().map(PathBuf::from);
    let initial_whitelist = match whitelist_path.as_deref() {
        Some(path) => match load_whitelist_from_path(path) {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to load whitelist");
                std::process::exit(1);
            }
        },
        None => Default::default(),
    };

    let hb_bridge = hb_bridge::Bridge::new(service_config.bridge);
    hb_bridge.whitelist.reload(initial_whitelist);

    let supervisor_bridge = hb_bridge.clone();
    tokio::spawn(async move {
        hb_bridge::supervisor::run(supervisor_bridge).await;
    });

    let state = Arc::new(AppState {
        bridge: hb_bridge,
        whitelist_path,
        logging_enabled: AtomicBool::new(true),
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&service_config.bind)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", service_config.bind));
    info!(addr = %service_config.bind, "bridge service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("bridge service shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { warn!("received SIGTERM, shutting down"); },
    }
}
