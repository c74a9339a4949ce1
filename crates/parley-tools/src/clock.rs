//! Current-time tool.

use crate::registry::{ToolHandler, ToolSpec};
use chrono::{FixedOffset, SecondsFormat, Utc};
use parley_types::ToolOutcome;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct TimeArgs {
    /// Optional UTC offset such as `+02:00` or `-05:30`. Defaults to UTC.
    #[serde(default)]
    offset: Option<String>,
}

/// Reports the current date and time, optionally shifted to a fixed UTC
/// offset. The only tool with no external dependency.
#[derive(Debug, Default)]
pub struct CurrentTimeTool;

#[async_trait::async_trait]
impl ToolHandler for CurrentTimeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "current_time",
            "Returns the current date and time, optionally at a fixed UTC offset",
            json!({
                "type": "object",
                "properties": {
                    "offset": {
                        "type": "string",
                        "description": "UTC offset like +02:00; omit for UTC"
                    }
                }
            }),
        )
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let args: TimeArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {e}")),
        };

        let now = Utc::now();
        match args.offset.as_deref() {
            None | Some("") => ToolOutcome::ok(json!({
                "iso8601": now.to_rfc3339_opts(SecondsFormat::Secs, true),
                "unix": now.timestamp(),
                "offset": "+00:00",
            })),
            Some(raw) => match raw.parse::<FixedOffset>() {
                Ok(offset) => {
                    let local = now.with_timezone(&offset);
                    ToolOutcome::ok(json!({
                        "iso8601": local.to_rfc3339_opts(SecondsFormat::Secs, false),
                        "unix": now.timestamp(),
                        "offset": raw,
                    }))
                }
                Err(_) => ToolOutcome::err(format!("invalid UTC offset: {raw}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reports_utc_by_default() {
        let outcome = CurrentTimeTool.call(json!({})).await;
        assert!(outcome.success);
        let data = outcome.data.unwrap();
        assert_eq!(data["offset"], "+00:00");
        assert!(data["unix"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn applies_fixed_offset() {
        let outcome = CurrentTimeTool.call(json!({"offset": "+02:00"})).await;
        assert!(outcome.success);
        let data = outcome.data.unwrap();
        assert_eq!(data["offset"], "+02:00");
        assert!(data["iso8601"].as_str().unwrap().ends_with("+02:00"));
    }

    #[tokio::test]
    async fn rejects_malformed_offset() {
        let outcome = CurrentTimeTool.call(json!({"offset": "pacific"})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("invalid UTC offset"));
    }
}
