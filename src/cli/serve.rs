//! `serve` command implementation.

use std::sync::Arc;

use crate::core::hub::Hub;
use crate::error::{ExitCode, Result};
use crate::server::{self, ServerState};
use crate::storage::config::ResolvedConfig;

/// Run the admin server until Ctrl-C.
pub async fn execute(config: &ResolvedConfig) -> Result<ExitCode> {
    let hub = Hub::from_config(config)?;
    if config.admin_key.is_none() {
        tracing::warn!("No admin key configured; admin routes are unauthenticated");
    }
    let state = Arc::new(ServerState::new(hub, config));
    let listener = server::bind(&config.bind).await?;

    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(ExitCode::Success)
}
