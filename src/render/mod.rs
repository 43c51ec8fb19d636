//! Output rendering for human and robot modes.

pub mod doctor;
pub mod error;
pub mod human;
pub mod robot;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::cli::args::OutputFormat;
use crate::core::doctor::DoctorReport;
use crate::core::models::SyncResult;
use crate::core::sync::ResyncResult;
use crate::core::token::AccessTokenMetadata;
use crate::error::Result;

/// Render a sync run.
pub fn render_sync(result: &SyncResult, format: OutputFormat, pretty: bool) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_sync(result)),
        OutputFormat::Json => robot::render_data(result, pretty),
    }
}

/// Render a doctor report and the optional repair that followed it.
pub fn render_doctor(
    report: &DoctorReport,
    repair: Option<&ResyncResult>,
    format: OutputFormat,
    pretty: bool,
) -> Result<String> {
    match format {
        OutputFormat::Human => {
            let mut output = doctor::render_human(report);
            if let Some(repair) = repair {
                output.push_str(&human::render_resync(repair));
            }
            Ok(output)
        }
        OutputFormat::Json => {
            robot::render_data(&json!({ "report": report, "repair": repair }), pretty)
        }
    }
}

/// Render token metadata.
pub fn render_token(
    metadata: &AccessTokenMetadata,
    now: DateTime<Utc>,
    format: OutputFormat,
    pretty: bool,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_token(metadata, now)),
        OutputFormat::Json => robot::render_data(metadata, pretty),
    }
}

/// Render a raw remote payload. Human mode prints it as indented JSON.
pub fn render_payload<T: Serialize>(payload: &T, format: OutputFormat, pretty: bool) -> Result<String> {
    match format {
        OutputFormat::Human => robot::render_json_pretty(payload),
        OutputFormat::Json => robot::render_data(payload, pretty),
    }
}
