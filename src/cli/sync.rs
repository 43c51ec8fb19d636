//! `sync` command implementation.

use std::time::{Duration, Instant};

use crate::cli::args::{OutputFormat, SyncArgs};
use crate::cli::range_from;
use crate::core::hub::Hub;
use crate::core::models::Resource;
use crate::core::sync::SyncRequest;
use crate::error::{ExitCode, Result};
use crate::render;
use crate::storage::config::ResolvedConfig;

/// Execute the sync command.
pub async fn execute(
    args: &SyncArgs,
    config: &ResolvedConfig,
    format: OutputFormat,
    pretty: bool,
) -> Result<ExitCode> {
    let hub = Hub::from_config(config)?;
    let request = build_request(args, &hub, config)?;
    tracing::info!(
        range = %request.range,
        resources = ?request.resources,
        resume = request.resume,
        "Starting sync"
    );

    let start = Instant::now();
    let result = hub.engine.run_sync(&request).await?;
    tracing::info!(
        upserted = result.upserted,
        failed = result.failed.len(),
        done = result.done,
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Sync finished"
    );

    let output = render::render_sync(&result, format, pretty)?;
    print!("{output}");
    if format == OutputFormat::Json {
        println!();
    }
    Ok(ExitCode::Success)
}

fn build_request(args: &SyncArgs, hub: &Hub, config: &ResolvedConfig) -> Result<SyncRequest> {
    let range = range_from(&hub.default_range(), &args.range)?;
    let resources = args
        .resources
        .iter()
        .map(|name| Resource::from_arg(name))
        .collect::<Result<Vec<_>>>()?;

    let mut request = SyncRequest::new(range).with_resources(resources);
    request.resume = args.resume;
    request.persist_watermark = args.persist || args.resume;
    request.budget = args.budget_secs.map(Duration::from_secs).or(config.budget);
    Ok(request)
}
