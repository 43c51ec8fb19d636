//! `auth` command implementation.

use crate::cli::args::{AuthCommand, OutputFormat};
use crate::core::hub::Hub;
use crate::error::{ExitCode, Result};
use crate::render;
use crate::storage::config::ResolvedConfig;

/// Execute the auth command.
pub async fn execute(
    command: AuthCommand,
    config: &ResolvedConfig,
    format: OutputFormat,
    pretty: bool,
) -> Result<ExitCode> {
    let hub = Hub::from_config(config)?;
    let force = matches!(command, AuthCommand::Refresh);
    tracing::debug!(force, "Acquiring access token");
    hub.tokens.token(force).await?;

    let output = render::render_token(&hub.tokens.metadata(), hub.clock.now(), format, pretty)?;
    print!("{output}");
    if format == OutputFormat::Json {
        println!();
    }
    Ok(ExitCode::Success)
}
