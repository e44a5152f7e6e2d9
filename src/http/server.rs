//! Server wiring.
//!
//! # Responsibilities
//! - Build the proxy router (catch-all) and its middleware
//! - Bind the proxy and admin listeners, plain or TLS
//! - Tie together engine, maintenance loop, and signal handling
//!
//! # Design Decisions
//! - Both listeners share one graceful-shutdown mechanism driven by
//!   `axum_server::Handle`s
//! - The request timeout renders a plain 503 body instead of axum's
//!   default timeout response

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::{Config, TlsFiles};
use crate::engine::backend::BackendError;
use crate::engine::{maintenance, AdmissionEngine};
use crate::http::proxy::proxy_handler;
use crate::lifecycle::{signals, Shutdown};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AdmissionEngine>,
    pub config: Arc<Config>,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid listen address `{addr}`: {source}")]
    Addr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The queueing reverse proxy: engine plus its two HTTP surfaces.
pub struct QProxy {
    config: Arc<Config>,
    engine: Arc<AdmissionEngine>,
    shutdown: Shutdown,
}

impl QProxy {
    pub fn new(config: Config) -> Result<Self, BackendError> {
        let config = Arc::new(config);
        let engine = Arc::new(AdmissionEngine::new(config.clone())?);

        Ok(Self {
            config,
            engine,
            shutdown: Shutdown::new(),
        })
    }

    pub fn engine(&self) -> &Arc<AdmissionEngine> {
        &self.engine
    }

    /// Serve both listeners until a shutdown signal drains them.
    pub async fn run(&self) -> Result<(), ServeError> {
        let fixed = self.config.fixed();
        let proxy_addr = parse_addr(&fixed.addr)?;
        let api_addr = parse_addr(&fixed.api_addr)?;

        let state = AppState {
            engine: self.engine.clone(),
            config: self.config.clone(),
        };

        maintenance::spawn(self.engine.clone(), self.config.clone(), &self.shutdown);

        let proxy_handle = Handle::new();
        let api_handle = Handle::new();
        signals::spawn(
            self.engine.clone(),
            vec![proxy_handle.clone(), api_handle.clone()],
            self.shutdown.clone(),
        );

        let api_app = admin::router(state.clone());
        let api_tls = fixed.api_tls.clone();
        let api_task = tokio::spawn(async move {
            if let Err(error) = serve(api_addr, api_tls, api_handle, api_app, "api").await {
                tracing::error!(%error, "api server error");
            }
        });

        let proxy_app = build_proxy_router(state);
        let result = serve(
            proxy_addr,
            fixed.tls.clone(),
            proxy_handle,
            proxy_app,
            "proxy",
        )
        .await;

        self.shutdown.trigger();
        let _ = api_task.await;

        result.map_err(ServeError::from)
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ServeError> {
    addr.parse().map_err(|source| ServeError::Addr {
        addr: addr.to_string(),
        source,
    })
}

/// Catch-all router for user traffic.
fn build_proxy_router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            timeout_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Cap total handling time; slow requests get a plain 503.
async fn timeout_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let timeout = state.config.fixed().timeout;
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response(),
    }
}

async fn serve(
    addr: SocketAddr,
    tls: Option<TlsFiles>,
    handle: Handle,
    app: Router,
    surface: &'static str,
) -> std::io::Result<()> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    match tls {
        Some(files) => {
            let tls_config = RustlsConfig::from_pem_file(&files.cert_file, &files.key_file).await?;
            tracing::info!(protocol = "https", %addr, surface, "listener started");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(make_service)
                .await
        }
        None => {
            tracing::info!(protocol = "http", %addr, surface, "listener started");
            axum_server::bind(addr)
                .handle(handle)
                .serve(make_service)
                .await
        }
    }
}
