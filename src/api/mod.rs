//! HTTP and WebSocket listener
//!
//! Serves on-demand queries against the sample store and the live snapshot
//! stream.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Store health
//! - `GET /api/v1/snapshot` - One snapshot (same schema as live frames)
//! - `GET /api/v1/:probe/windows?key=` - 1m / 5m / 1h window stats
//! - `GET /api/v1/:probe/series?range=&key=&group=` - Raw samples
//! - `POST /api/v1/:probe/run` - Ad-hoc probe
//! - `WS /api/v1/live` - Live snapshots

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tokio_util::sync::CancellationToken;
#[cfg(feature = "api")]
use tracing::info;

#[cfg(feature = "api")]
use crate::supervisor::{ListenerHandle, StartupError};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "127.0.0.1:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboard
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

/// Build the router with every route
#[cfg(feature = "api")]
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/snapshot", get(routes::snapshot::get_snapshot))
        .route("/api/v1/live", get(websocket::live_handler))
        .route("/api/v1/:probe/windows", get(routes::windows::get_windows))
        .route("/api/v1/:probe/series", get(routes::windows::get_series))
        .route("/api/v1/:probe/run", post(routes::probes::run_probe))
        .layer(middleware::from_fn_with_state(state.clone(), cut_on_terminate))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Race every request against the listener's terminate token
///
/// A handler still running when the token fires is dropped and the client
/// gets a 503.
#[cfg(feature = "api")]
async fn cut_on_terminate(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    tokio::select! {
        response = next.run(request) => response,
        _ = state.terminate.cancelled() => {
            tracing::warn!("request cut short by listener shutdown");
            ApiError::ShuttingDown.into_response()
        }
    }
}

/// Bind the listener and serve in a background task
///
/// A server error after startup cancels `shutdown`. The returned handle is
/// used by the supervisor to stop the server. If binding fails the
/// broadcaster spawned with `state` is closed before returning.
#[cfg(feature = "api")]
pub async fn spawn_api_server(
    config: ApiConfig,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, ListenerHandle), StartupError> {
    info!("starting API server on {}", config.bind_addr);

    let broadcaster = state.broadcaster.clone();
    let terminate = state.terminate.clone();
    let app = router(state, config.enable_cors);

    let bound = async {
        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        let addr = listener.local_addr()?;
        Ok::<_, std::io::Error>((listener, addr))
    };
    let (listener, addr) = match bound.await {
        Ok(bound) => bound,
        Err(source) => {
            if let Err(e) = broadcaster.close().await {
                tracing::warn!("Failed to close broadcaster: {}", e);
            }
            return Err(StartupError::Bind {
                addr: config.bind_addr,
                source,
            });
        }
    };

    info!("API server listening on {}", addr);

    let graceful = CancellationToken::new();
    let stop_accepting = graceful.clone();

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop_accepting.cancelled().await })
            .await;

        if let Err(e) = result {
            tracing::error!("API server error: {}", e);
            shutdown.cancel();
        }
    });

    Ok((
        addr,
        ListenerHandle {
            graceful,
            terminate,
            task,
            broadcaster: Some(broadcaster),
        },
    ))
}
