// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured object tracing.
//!
//! Renders serializable values as indented trees, capped at a maximum
//! depth and value width so a config dump stays readable in a terminal.
//! Used behind the daemon's debug flag; never on a hot path.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::Serialize;

/// Renders nested values as indented trees.
#[derive(Debug, Clone)]
pub struct ObjectTracer {
    max_depth: usize,
    max_value_width: usize,
}

impl Default for ObjectTracer {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_value_width: 80,
        }
    }
}

impl ObjectTracer {
    /// Create a tracer with the given depth cap.
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Default::default()
        }
    }

    /// Render any serializable value under a label.
    ///
    /// Unserializable values render as an error note rather than failing.
    pub fn trace<T: Serialize>(&self, label: &str, value: &T) -> String {
        match serde_json::to_value(value) {
            Ok(value) => {
                let mut out = String::new();
                out.push_str(label);
                self.render(&value, 0, &mut out);
                out.push('\n');
                out
            }
            Err(err) => format!("{label}: <unserializable: {err}>\n"),
        }
    }

    fn render(&self, value: &serde_json::Value, depth: usize, out: &mut String) {
        if depth >= self.max_depth {
            out.push_str(": …");
            return;
        }
        let pad = "  ".repeat(depth + 1);
        match value {
            serde_json::Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    out.push('\n');
                    out.push_str(&pad);
                    out.push_str(key);
                    self.render(child, depth + 1, out);
                }
            }
            serde_json::Value::Array(items) if !items.is_empty() => {
                for (index, child) in items.iter().enumerate() {
                    out.push('\n');
                    out.push_str(&pad);
                    out.push_str(&format!("[{index}]"));
                    self.render(child, depth + 1, out);
                }
            }
            other => {
                out.push_str(": ");
                out.push_str(&self.scalar(other));
            }
        }
    }

    fn scalar(&self, value: &serde_json::Value) -> String {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.chars().count() > self.max_value_width {
            let truncated: String = text.chars().take(self.max_value_width).collect();
            format!("{truncated}…")
        } else {
            text
        }
    }
}
