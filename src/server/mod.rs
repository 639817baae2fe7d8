pub mod dto;
pub mod error;
pub mod handlers;
pub mod sessions;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::error::KiraError;
use crate::ncbi::NcbiClient;

use self::sessions::SessionRegistry;

pub struct AppState<N: NcbiClient + 'static> {
    pub app: Arc<App<N>>,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown: CancellationToken,
}

impl<N: NcbiClient + 'static> Clone for AppState<N> {
    fn clone(&self) -> Self {
        Self {
            app: Arc::clone(&self.app),
            sessions: Arc::clone(&self.sessions),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<N: NcbiClient + 'static> AppState<N> {
    pub fn new(app: App<N>, max_sessions: usize, shutdown: CancellationToken) -> Self {
        Self {
            app: Arc::new(app),
            sessions: Arc::new(SessionRegistry::new(max_sessions)),
            shutdown,
        }
    }
}

pub fn create_router<N: NcbiClient + 'static>(state: AppState<N>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            handlers::FAILED_SPECIES_HEADER,
            axum::http::header::CONTENT_DISPOSITION,
        ]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/get_species", post(handlers::get_species::<N>))
        .route("/api/download", post(handlers::download::<N>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<N: NcbiClient + 'static>(
    bind: SocketAddr,
    state: AppState<N>,
) -> Result<(), KiraError> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| KiraError::Server(format!("cannot bind {bind}: {err}")))?;
    let addr = listener
        .local_addr()
        .map_err(|err| KiraError::Server(err.to_string()))?;
    let shutdown = state.shutdown.clone();
    tracing::info!(%addr, "listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|err| KiraError::Server(err.to_string()))?;

    tracing::info!("server shut down");
    Ok(())
}
