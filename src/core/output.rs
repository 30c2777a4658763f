//! Terminal rendering for command results.
//!
//! Commands produce JSON envelopes; `--format text` turns them into one colored
//! status line followed by the payload.

use colored::Colorize;
use serde_json::Value as JsonValue;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

pub fn status_line(cmd: &str, status: &str) -> String {
    let badge = match status {
        "ok" => status.green().bold(),
        "error" => status.red().bold(),
        _ => status.yellow().bold(),
    };
    format!("{} {}", badge, cmd.bright_white())
}

/// Render an envelope produced by `time::command_envelope` for humans.
pub fn render_text(envelope: &JsonValue) -> String {
    let cmd = envelope.get("cmd").and_then(JsonValue::as_str).unwrap_or("?");
    let status = envelope
        .get("status")
        .and_then(JsonValue::as_str)
        .unwrap_or("?");
    let mut out = status_line(cmd, status);

    if let Some(preview) = envelope.get("preview").and_then(JsonValue::as_array) {
        for line in preview.iter().filter_map(JsonValue::as_str) {
            out.push('\n');
            out.push_str(line);
        }
        return out;
    }
    if let Some(fields) = envelope.as_object() {
        for (key, value) in fields {
            if matches!(key.as_str(), "cmd" | "status" | "ts" | "event_id" | "envelope_version") {
                continue;
            }
            let rendered = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("\n  {}: {}", key.cyan(), compact_line(&rendered, 160)));
        }
    }
    out
}
