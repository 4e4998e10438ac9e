// JSON output for run results

use crate::executor::result::TaskResult;
use crate::output::errors::AutomateError;

/// Serialize result groups for `--as-json`.
///
/// By default non-ASCII characters are escaped as `\uXXXX` sequences so the
/// output is safe for ASCII-only sinks; `raw_utf8` emits them verbatim.
pub fn results_to_json(results: &[Vec<TaskResult>], raw_utf8: bool) -> Result<String, AutomateError> {
    let text = serde_json::to_string_pretty(results).map_err(|e| AutomateError::Io {
        message: format!("Failed to serialize results: {}", e),
        path: None,
    })?;

    if raw_utf8 {
        Ok(text)
    } else {
        Ok(escape_non_ascii(&text))
    }
}

fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
