//! Machine-readable output.
//!
//! Every command prints one JSON document on stdout: `{"ok": true, "data": ...}`
//! on success, `{"ok": false, "error": ...}` on failure.

use serde::Serialize;

use crate::error::Result;

#[derive(Serialize)]
struct RobotOutput<'a, T: Serialize> {
    ok: bool,
    data: &'a T,
}

/// Render any serializable value as compact JSON.
pub fn render_json<T: Serialize>(output: &T) -> Result<String> {
    Ok(serde_json::to_string(output)?)
}

/// Render any serializable value as pretty JSON.
pub fn render_json_pretty<T: Serialize>(output: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(output)?)
}

/// Wrap `data` in the success document.
pub fn render_data<T: Serialize>(data: &T, pretty: bool) -> Result<String> {
    let output = RobotOutput { ok: true, data };
    if pretty {
        render_json_pretty(&output)
    } else {
        render_json(&output)
    }
}
