//! procrpc - RPC server daemon
//!
//! Serves the built-in demo program over UDP until SIGINT or SIGTERM.

mod service;

use procrpc_transport::config::CONFIG_ENV;
use procrpc_transport::{
    Config, ConnectionManager, ConnectionOptions, DatagramConnection, ShutdownHandle,
};
use service::DemoService;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if PROCRPC_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var(CONFIG_ENV) {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting procrpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Buffer size: {}", config.network.effective_buffer_size());
    tracing::info!(
        "  Reply timeout: {}ms",
        config.server.reply_timeout().as_millis()
    );

    let server = DatagramConnection::bind_server(
        config.network.bind_addr,
        ConnectionOptions {
            timeout: config.server.reply_timeout(),
            buffer_size: config.network.effective_buffer_size(),
            auto_destroy: false,
        },
    )?;

    let mut manager = ConnectionManager::new(&config.reactor)?;
    let id = manager.add_connection(server);

    // Spawn shutdown signal handler
    spawn_signal_watcher(manager.shutdown_handle())?;

    // Run reactor (blocks until shutdown)
    let mut service = DemoService::new();
    manager.run(&mut service)?;

    if let Some(mut conn) = manager.remove(id) {
        conn.shutdown();
    }

    let stats = manager.stats();
    tracing::info!(
        calls = service.calls(),
        received = stats.datagrams_received,
        sent = stats.datagrams_sent,
        timeouts = stats.timeouts,
        rx_errors = stats.rx_errors,
        tx_errors = stats.tx_errors,
        protocol_errors = stats.protocol_errors,
        "Server stopped"
    );
    Ok(())
}

/// Watches for SIGINT/SIGTERM on a helper thread and stops the reactor.
fn spawn_signal_watcher(handle: ShutdownHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("procrpc-signals".to_string())
        .spawn(move || {
            runtime.block_on(wait_for_signal());
            tracing::info!("Received shutdown signal, stopping server...");
            handle.shutdown();
        })?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
