//! Liveness and readiness probes
//!
//! - `GET /healthz` answers `ok` while the process is serving
//! - `GET /readyz` answers `ok` once the controller is reconciling, 503 before
//!   that (or after leadership is lost)

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::Error;

/// Shared readiness flag flipped by the binary
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// A flag that starts out not ready
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the controller ready or not ready
    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    /// Current readiness
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build the probe router
pub fn probe_routes(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(readiness)
}

async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Bind the probe listener
///
/// Done before the controller starts so a taken port fails startup instead
/// of leaving the pod without probes.
pub async fn bind_probes(addr: SocketAddr) -> Result<TcpListener, Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal(format!("failed to bind probe address {}: {}", addr, e)))?;
    info!(addr = %addr, "health probes listening");
    Ok(listener)
}

/// Serve probes on a bound listener; only returns on server failure
pub async fn serve_probes(listener: TcpListener, readiness: Readiness) -> Result<(), Error> {
    axum::serve(listener, probe_routes(readiness))
        .await
        .map_err(|e| Error::internal(format!("probe server error: {}", e)))
}
