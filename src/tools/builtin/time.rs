//! Current-time tool.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};

use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str};

/// Reports the current time, optionally shifted by a UTC offset like `+02:00`.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Optionally pass a UTC offset such as \
         \"+02:00\" or \"-05:00\" to get local time for that offset."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset": {
                    "type": "string",
                    "description": "UTC offset in the form +HH:MM or -HH:MM (default: UTC)"
                }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let now = Utc::now();
        let text = match optional_str(&params, "utc_offset") {
            Some(raw) => {
                let offset = parse_offset(raw).ok_or_else(|| ToolError::InvalidParameters {
                    name: self.name().to_string(),
                    reason: format!("bad utc_offset '{raw}', expected +HH:MM"),
                })?;
                now.with_timezone(&offset).to_rfc3339()
            }
            None => now.to_rfc3339(),
        };
        Ok(ToolOutput::text(text, start.elapsed()))
    }
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
