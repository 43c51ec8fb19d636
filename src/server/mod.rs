//! Administrative HTTP surface.
//!
//! A thin adapter over the sync core: one task per connection on hyper's
//! http1 server, every handler returning the JSON envelope from
//! [`envelope`].

pub mod envelope;
pub mod routes;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::core::hub::Hub;
use crate::error::{HubError, Result};
use crate::storage::config::ResolvedConfig;

pub use routes::ADMIN_KEY_HEADER;

/// Shared state of the admin server.
pub struct ServerState {
    pub hub: Hub,
    /// Required `x-internal-key` value, when set.
    pub admin_key: Option<String>,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Default time budget for `/reconcile` runs.
    pub sync_budget: Option<Duration>,
}

impl ServerState {
    #[must_use]
    pub fn new(hub: Hub, config: &ResolvedConfig) -> Self {
        Self {
            hub,
            admin_key: config.admin_key.clone(),
            request_timeout: config.request_timeout,
            sync_budget: config.budget,
        }
    }
}

/// Bind the listener.
///
/// # Errors
///
/// Returns [`HubError::Config`] for an unparsable address and
/// [`HubError::Io`] when the socket cannot be bound.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| HubError::Config(format!("invalid bind address '{addr}': {e}")))?;
    Ok(TcpListener::bind(addr).await?)
}

/// Accept connections until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`HubError::Io`] when accepting fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<ServerState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Admin server listening");
    }
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            () = &mut shutdown => {
                tracing::info!("Admin server shutting down");
                return Ok(());
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(routes::handle(&state, req).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(%peer, error = %e, "Connection closed with error");
            }
        });
    }
}
