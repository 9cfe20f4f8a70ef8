//! User-defined tools declared as JSON manifests.
//!
//! Each `*.json` file in the tools directory declares one tool whose calls are
//! forwarded to a webhook:
//!
//! ```json
//! {
//!   "name": "get_weather",
//!   "description": "Current weather for a city",
//!   "parameters": [{"name": "city", "type": "string", "description": "City", "required": true}],
//!   "webhook": "http://localhost:8080/weather"
//! }
//! ```
//!
//! Files whose name starts with `_` are skipped.

use anyhow::{Context, Result};
use reqwest::Url;
use robot_core::tools::{ParamType, ToolDefinition};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ToolManifest {
    name: String,
    description: String,
    #[serde(default)]
    parameters: Vec<ManifestParam>,
    webhook: String,
}

#[derive(Debug, Deserialize)]
struct ManifestParam {
    name: String,
    #[serde(rename = "type")]
    param_type: ParamType,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required: bool,
}

fn parse_manifest(json: &str, client: &reqwest::Client) -> Result<ToolDefinition> {
    let manifest: ToolManifest = serde_json::from_str(json)?;
    if manifest.name.trim().is_empty() {
        anyhow::bail!("tool name is empty");
    }
    let url = Url::parse(&manifest.webhook)
        .with_context(|| format!("invalid webhook URL {:?}", manifest.webhook))?;

    let client = client.clone();
    let mut tool = ToolDefinition::from_async(manifest.name, manifest.description, move |args| {
        let client = client.clone();
        let url = url.clone();
        async move {
            let reply = client
                .post(url)
                .json(&args)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            Ok(reply)
        }
    });
    for p in manifest.parameters {
        tool = tool.param(p.name, p.param_type, p.description, p.required);
    }
    Ok(tool)
}

/// Loads every tool manifest in `dir`, sorted by file name. A missing directory
/// yields no tools; bad manifests are logged and skipped.
pub fn load_tools(dir: &Path) -> Result<Vec<ToolDefinition>> {
    if !dir.is_dir() {
        tracing::debug!("User tools directory not found: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read tools directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let is_json = path.extension().and_then(|s| s.to_str()) == Some("json");
        let skipped = path
            .file_name()
            .and_then(|s| s.to_str())
            .is_some_and(|name| name.starts_with('_'));
        if path.is_file() && is_json && !skipped {
            paths.push(path);
        }
    }
    paths.sort();

    let client = reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()
        .context("Failed to build webhook client")?;

    let mut tools = Vec::new();
    for path in paths {
        let loaded = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|json| parse_manifest(&json, &client));
        match loaded {
            Ok(tool) => {
                tracing::info!("Loaded user tool '{}' from {}", tool.name, path.display());
                tools.push(tool);
            }
            Err(e) => tracing::warn!("Skipping tool manifest {}: {:#}", path.display(), e),
        }
    }
    Ok(tools)
}
