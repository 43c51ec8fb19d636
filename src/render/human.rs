//! Plain-text renderers for terminal output.

use chrono::{DateTime, Utc};

use crate::core::models::{SyncCursor, SyncFailure, SyncResult};
use crate::core::sync::ResyncResult;
use crate::core::token::AccessTokenMetadata;
use crate::util::{format_count, format_countdown, format_relative_time};

/// Render the summary of a sync run.
#[must_use]
pub fn render_sync(result: &SyncResult) -> String {
    let mut output = String::new();
    let resources: Vec<String> = result.resources.iter().map(ToString::to_string).collect();
    output.push_str(&format!("Sync {} ({})\n", result.range, resources.join(", ")));
    if let Some(cursor) = &result.resumed_from {
        output.push_str(&format!("  resumed from {}\n", describe_cursor(cursor)));
    }
    output.push_str(&format!(
        "  fetched {}  upserted {}  derived {}  pages {}\n",
        format_count(result.fetched),
        format_count(result.upserted),
        format_count(result.derived_upserted),
        format_count(result.pages_fetched),
    ));
    output.push_str(&render_failures(&result.failed));
    if result.done {
        output.push_str("  complete\n");
    } else if let Some(cursor) = &result.next_cursor {
        output.push_str(&format!(
            "  stopped on time budget; next: {}\n",
            describe_cursor(cursor)
        ));
    }
    output
}

/// Render the outcome of a targeted re-sync.
#[must_use]
pub fn render_resync(result: &ResyncResult) -> String {
    let mut output = format!(
        "Repair {}: requested {}  upserted {}  derived {}\n",
        result.resource,
        format_count(result.requested),
        format_count(result.upserted),
        format_count(result.derived_upserted),
    );
    output.push_str(&render_failures(&result.failed));
    output
}

/// Render token metadata relative to `now`.
#[must_use]
pub fn render_token(metadata: &AccessTokenMetadata, now: DateTime<Utc>) -> String {
    if !metadata.has_token {
        return "Token: none cached\n".to_string();
    }
    let mut output = format!(
        "Token: present ({})\n",
        metadata.token_type.as_deref().unwrap_or("Bearer")
    );
    if let Some(obtained) = metadata.obtained_at {
        output.push_str(&format!("  obtained {}\n", format_relative_time(obtained, now)));
    }
    if let Some(expires) = metadata.expires_at {
        output.push_str(&format!(
            "  expires {} ({})\n",
            format_countdown(expires, now),
            expires.to_rfc3339()
        ));
    }
    output
}

fn render_failures(failed: &[SyncFailure]) -> String {
    if failed.is_empty() {
        return String::new();
    }
    let mut output = format!("  failed {}:\n", format_count(failed.len()));
    for failure in failed {
        output.push_str(&format!(
            "    {} {}: {}\n",
            failure.resource, failure.external_id, failure.reason
        ));
    }
    output
}

fn describe_cursor(cursor: &SyncCursor) -> String {
    format!(
        "{} window {} page {}",
        cursor.resource, cursor.window, cursor.page
    )
}
