//! OS signal handling.
//!
//! # Responsibilities
//! - SIGINT/SIGTERM: drain both listeners within a 30s budget, then
//!   release every background task
//! - SIGUSR2: reload the configuration in place
//!
//! # Design Decisions
//! - Tokio's async-safe unix signal streams
//! - Reload runs on the blocking pool; it reads files and takes the
//!   engine's write lock

use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use tokio::signal::unix::{signal, SignalKind};

use crate::engine::AdmissionEngine;
use crate::lifecycle::Shutdown;

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

pub fn spawn(engine: Arc<AdmissionEngine>, handles: Vec<Handle>, shutdown: Shutdown) {
    tokio::spawn(handle_shutdown_signals(handles, shutdown.clone()));
    tokio::spawn(handle_reload_signals(engine, shutdown));
}

async fn handle_shutdown_signals(handles: Vec<Handle>, shutdown: Shutdown) {
    let (mut interrupt, mut terminate) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
        (Err(error), _) | (_, Err(error)) => {
            tracing::error!(%error, "unable to install shutdown signal handlers");
            return;
        }
    };
    let mut done = shutdown.subscribe();

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = done.recv() => return,
    }

    tracing::info!("shutting down");
    for handle in &handles {
        handle.graceful_shutdown(Some(SHUTDOWN_BUDGET));
    }
    shutdown.trigger();
}

async fn handle_reload_signals(engine: Arc<AdmissionEngine>, shutdown: Shutdown) {
    let mut reload = match signal(SignalKind::user_defined2()) {
        Ok(reload) => reload,
        Err(error) => {
            tracing::error!(%error, "unable to install reload signal handler");
            return;
        }
    };
    let mut done = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = reload.recv() => {
                let engine = engine.clone();
                if tokio::task::spawn_blocking(move || engine.reload()).await.is_err() {
                    tracing::error!("configuration reload task failed");
                }
            }
            _ = done.recv() => return,
        }
    }
}
