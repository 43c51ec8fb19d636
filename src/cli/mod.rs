//! CLI argument parsing and command dispatch.

pub mod args;
pub mod auth;
pub mod doctor;
pub mod fetch;
pub mod serve;
pub mod sync;

pub use args::{Cli, Commands, OutputFormat};

use crate::core::range::SyncRange;
use crate::error::{ExitCode, Result};
use crate::storage::config::ResolvedConfig;

/// Resolve configuration and run the selected command.
///
/// # Errors
///
/// Returns whatever the command fails with; the caller maps it to an exit code.
pub async fn run(cli: Cli) -> Result<ExitCode> {
    let format = cli.effective_format();
    let pretty = cli.pretty;
    let config = ResolvedConfig::resolve(&cli.overrides())?;
    tracing::debug!(
        base_url = %config.base_url,
        cache = %config.cache_path.display(),
        "Configuration resolved"
    );

    match cli.command {
        Commands::Auth(command) => auth::execute(command, &config, format, pretty).await,
        Commands::Sync(args) => sync::execute(&args, &config, format, pretty).await,
        Commands::Doctor(args) => doctor::execute(&args, &config, format, pretty).await,
        Commands::Fetch(args) => fetch::execute(&args, &config, format, pretty).await,
        Commands::Serve(_) => serve::execute(&config).await,
    }
}

/// Apply `--start`/`--end` over the default range.
pub(crate) fn range_from(
    default: &SyncRange,
    range: &args::RangeArgs,
) -> Result<SyncRange> {
    default.with_bounds(range.start.as_deref(), range.end.as_deref())
}
