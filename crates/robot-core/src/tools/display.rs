use super::{ParamType, ToolDefinition, string_arg};
use crate::hardware::Display;
use serde_json::json;
use std::sync::Arc;

/// Screen tools bound to one display.
pub fn display_tools(display: Arc<dyn Display>) -> Vec<ToolDefinition> {
    let text_display = display.clone();
    let status_display = display.clone();
    vec![
        ToolDefinition::from_fn("display_text", "Show text on the robot's screen.", move |args| {
            let text = string_arg(&args, "text")?;
            text_display.show_text(&text)?;
            Ok(json!({ "status": "ok", "text": text }))
        })
        .param("text", ParamType::String, "Text content to display", true),
        ToolDefinition::from_fn(
            "display_status",
            "Show a status indicator on the robot's screen.",
            move |args| {
                let status = string_arg(&args, "status")?;
                status_display.show_status(&status)?;
                Ok(json!({ "status": "ok", "status_shown": status }))
            },
        )
        .param(
            "status",
            ParamType::String,
            "Status string (e.g., 'listening', 'thinking')",
            true,
        ),
        ToolDefinition::from_fn("clear_display", "Clear the robot's screen.", move |_| {
            display.clear()?;
            Ok(json!({ "status": "ok" }))
        }),
    ]
}
