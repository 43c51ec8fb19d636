//! `doctor` command implementation.

use crate::cli::args::{DoctorArgs, OutputFormat};
use crate::cli::range_from;
use crate::core::doctor::DoctorRequest;
use crate::core::hub::Hub;
use crate::core::doctor::DoctorReport;
use crate::core::models::Resource;
use crate::core::sync::ResyncResult;
use crate::error::{ExitCode, Result};
use crate::render;
use crate::storage::config::ResolvedConfig;

/// Execute the doctor command.
///
/// Exits with [`ExitCode::GeneralError`] when drift remains after the run;
/// see [`drift_remains`].
pub async fn execute(
    args: &DoctorArgs,
    config: &ResolvedConfig,
    format: OutputFormat,
    pretty: bool,
) -> Result<ExitCode> {
    let hub = Hub::from_config(config)?;
    let request = DoctorRequest {
        range: range_from(&hub.default_range(), &args.range)?,
        resource: Resource::from_arg(&args.resource)?,
    };

    let report = hub.doctor.run(&request).await?;
    let flagged = report.flagged_ids();
    tracing::info!(
        resource = %request.resource,
        flagged = flagged.len(),
        clean = report.is_clean(),
        "Doctor check finished"
    );

    let repair = if args.repair && !flagged.is_empty() {
        Some(hub.engine.resync_records(request.resource, &flagged).await?)
    } else {
        None
    };

    let output = render::render_doctor(&report, repair.as_ref(), format, pretty)?;
    print!("{output}");
    if format == OutputFormat::Json {
        println!();
    }

    Ok(if drift_remains(&report, args.repair, repair.as_ref()) {
        ExitCode::GeneralError
    } else {
        ExitCode::Success
    })
}

/// Without `--repair`, any finding counts. With it, only records that failed
/// to re-sync count: extra and unmapped records are reported, not repaired.
fn drift_remains(report: &DoctorReport, repair_requested: bool, repair: Option<&ResyncResult>) -> bool {
    if repair_requested {
        repair.is_some_and(|r| !r.failed.is_empty())
    } else {
        !report.is_clean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::core::models::SyncFailure;
    use crate::core::range::SyncRange;

    fn report() -> DoctorReport {
        DoctorReport {
            checked_range: SyncRange::parse("2024-01-01", "2024-02-01").unwrap(),
            resource: Resource::Sales,
            remote_count: 2,
            cached_count: 2,
            missing_in_cache: BTreeSet::new(),
            mismatched: Vec::new(),
            extra_in_cache: BTreeSet::new(),
            unmapped_remote: Vec::new(),
        }
    }

    fn resync(failed: &[&str]) -> ResyncResult {
        ResyncResult {
            resource: Resource::Sales,
            requested: failed.len() + 1,
            upserted: 1,
            derived_upserted: 1,
            failed: failed
                .iter()
                .map(|id| SyncFailure {
                    resource: Resource::Sales,
                    external_id: (*id).to_string(),
                    reason: "gone".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn findings_fail_without_repair() {
        assert!(!drift_remains(&report(), false, None));
        let mut extra = report();
        extra.extra_in_cache.insert("s-9".to_string());
        assert!(drift_remains(&extra, false, None));
    }

    #[test]
    fn repair_exit_follows_resync_failures() {
        let mut extra_only = report();
        extra_only.extra_in_cache.insert("s-9".to_string());
        assert!(!drift_remains(&extra_only, true, None));

        let mut missing = report();
        missing.missing_in_cache.insert("s-1".to_string());
        assert!(!drift_remains(&missing, true, Some(&resync(&[]))));
        assert!(drift_remains(&missing, true, Some(&resync(&["s-1"]))));
    }
}
