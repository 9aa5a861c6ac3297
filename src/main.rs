use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slothold::config::Config;
use slothold::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    slothold::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let state = AppState::new(&config);
    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slothold listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  hold_ttl: {}s", config.hold_ttl.as_secs());
    info!("  single_hold: {}", config.single_hold);
    info!("  max_connections: {}", config.max_connections);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    server::serve(listener, state, shutdown_signal()).await?;

    info!("slothold stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
