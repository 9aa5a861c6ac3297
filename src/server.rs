use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::SharedSecret;
use crate::config::Config;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::tenant::TenantManager;
use crate::{http, ws};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    pub auth: Arc<SharedSecret>,
    /// One permit per live WebSocket session.
    pub sessions: Arc<Semaphore>,
    pub max_sessions: usize,
    /// Fired on shutdown; open sessions close themselves.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            tenants: Arc::new(TenantManager::new(
                config.data_dir.clone(),
                config.hold_policy(),
                config.reaper_interval,
            )),
            auth: Arc::new(SharedSecret::new(config.token.clone())),
            sessions: Arc::new(Semaphore::new(config.max_connections)),
            max_sessions: config.max_connections,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(http::healthz))
        .route("/slots/hold", post(http::hold))
        .route("/slots/release", post(http::release))
        .route("/slots/commit", post(http::commit))
        .route("/slots/holds", get(http::list_holds))
        .route("/slots/:id/status", get(http::status))
        .route("/days/:day/snapshot", get(http::snapshot))
        .route("/ws", get(ws::upgrade))
        .fallback(http::not_found)
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    response
}

/// Serve until `signal` resolves, then close WebSocket sessions and wait for
/// them to drain (bounded by a deadline).
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let sessions = state.sessions.clone();
    let max_sessions = state.max_sessions;
    let tenants = state.tenants.clone();

    let stop = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!("shutdown signal received, stopping accept loop");
            stop.cancel();
        })
        .await?;

    // Upgraded connections are not tracked by the HTTP server
    shutdown.cancel();
    info!("draining sessions...");
    let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(drain_deadline);

    loop {
        if sessions.available_permits() == max_sessions {
            info!("all sessions drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_sessions - sessions.available_permits();
                warn!("drain timeout, {remaining} sessions still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    tenants.shutdown();
    Ok(())
}
