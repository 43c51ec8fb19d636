//! Backfill doctor report rendering.

use serde_json::Value;

use crate::core::doctor::{DoctorReport, FieldMismatch};
use crate::util::{format_cents, format_count, format_value};

/// Longest rendering of a single field value.
const VALUE_WIDTH: usize = 40;
/// Ids listed per section before eliding the rest.
const MAX_LISTED: usize = 20;

/// Render a doctor report for human consumption.
#[must_use]
pub fn render_human(report: &DoctorReport) -> String {
    let mut output = format!(
        "Doctor {} {}\n  remote {}  cached {}\n",
        report.resource,
        report.checked_range,
        format_count(report.remote_count),
        format_count(report.cached_count),
    );

    if report.is_clean() {
        output.push_str("  no drift\n");
        return output;
    }

    output.push_str(&render_ids("missing in cache", report.missing_in_cache.iter()));
    if !report.mismatched.is_empty() {
        output.push_str(&format!(
            "  mismatched fields ({}):\n",
            format_count(report.mismatched.len())
        ));
        for mismatch in report.mismatched.iter().take(MAX_LISTED) {
            output.push_str(&render_mismatch(mismatch));
        }
        output.push_str(&elided(report.mismatched.len()));
    }
    output.push_str(&render_ids("extra in cache", report.extra_in_cache.iter()));
    if !report.unmapped_remote.is_empty() {
        output.push_str(&format!(
            "  unmapped remote ({}):\n",
            format_count(report.unmapped_remote.len())
        ));
        for failure in report.unmapped_remote.iter().take(MAX_LISTED) {
            output.push_str(&format!("    {}: {}\n", failure.external_id, failure.reason));
        }
        output.push_str(&elided(report.unmapped_remote.len()));
    }
    output
}

fn render_ids<'a>(label: &str, ids: impl ExactSizeIterator<Item = &'a String>) -> String {
    let total = ids.len();
    if total == 0 {
        return String::new();
    }
    let listed: Vec<&str> = ids.take(MAX_LISTED).map(String::as_str).collect();
    let mut output = format!("  {label} ({}): {}\n", format_count(total), listed.join(", "));
    output.push_str(&elided(total));
    output
}

fn render_mismatch(mismatch: &FieldMismatch) -> String {
    format!(
        "    {}.{}: remote {} / cache {}\n",
        mismatch.external_id,
        mismatch.field,
        field_value(&mismatch.field, &mismatch.remote_value),
        field_value(&mismatch.field, &mismatch.cache_value),
    )
}

fn field_value(field: &str, value: &Value) -> String {
    match value.as_i64() {
        Some(cents) if field.ends_with("_cents") => format_cents(cents),
        _ => format_value(value, VALUE_WIDTH),
    }
}

fn elided(total: usize) -> String {
    if total > MAX_LISTED {
        format!("    ... and {} more\n", format_count(total - MAX_LISTED))
    } else {
        String::new()
    }
}
