//! Error rendering for sigmahub.

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::HubError;

/// Render an error for stderr in the requested format.
#[must_use]
pub fn render_error(error: &HubError, format: OutputFormat, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_simple(error),
    }
}

/// Render error as structured JSON for machine consumption.
#[must_use]
pub fn render_error_json(error: &HubError, pretty: bool) -> String {
    let output = ErrorOutput {
        ok: false,
        error: ErrorJson::from_error(error),
    };
    let rendered = if pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    };
    rendered.unwrap_or_else(|_| render_simple(error))
}

/// Plain one-line form: `error[SHUB-R001]: message`.
#[must_use]
pub fn render_simple(error: &HubError) -> String {
    format!("error[{}]: {error}", error.error_code())
}

#[derive(Serialize)]
struct ErrorOutput {
    ok: bool,
    error: ErrorJson,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorJson {
    code: &'static str,
    category: &'static str,
    message: String,
    exit_code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    retryable: bool,
}

impl ErrorJson {
    fn from_error(error: &HubError) -> Self {
        Self {
            code: error.error_code(),
            category: error.category().description(),
            message: error.to_string(),
            exit_code: error.exit_code() as u8,
            status_code: error.status_code(),
            retryable: error.is_retryable(),
        }
    }
}
