//! Tools the model can call during a conversation.
//!
//! The dispatcher is filled once at build time and read-only afterwards.

pub mod camera;
pub mod display;

use crate::generic_types::{ToolArgs, ToolResult};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub use camera::camera_tools;
pub use display::display_tools;

/// Schema type of a tool parameter, in the uppercase form the model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamType {
    #[serde(alias = "string")]
    String,
    #[serde(alias = "number")]
    Number,
    #[serde(alias = "integer")]
    Integer,
    #[serde(alias = "boolean")]
    Boolean,
    #[serde(alias = "array")]
    Array,
    #[serde(alias = "object")]
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolParam {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

pub type ToolFuture = BoxFuture<'static, anyhow::Result<Value>>;
pub type ToolHandler = Arc<dyn Fn(ToolArgs) -> ToolFuture + Send + Sync>;

/// A named capability the model can invoke.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParam>,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    /// A tool backed by a synchronous function.
    pub fn from_fn<F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler: Arc::new(move |args| {
                let f = f.clone();
                async move { f(args) }.boxed()
            }),
        }
    }

    /// A tool backed by an async function.
    pub fn from_async<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler: Arc::new(move |args| f(args).boxed()),
        }
    }

    /// Adds a parameter, keeping declaration order.
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.parameters.push(ToolParam {
            name: name.into(),
            param_type,
            description: description.into(),
            required,
        });
        self
    }

    pub fn declaration(&self) -> FunctionDeclaration {
        let parameters = if self.parameters.is_empty() {
            None
        } else {
            Some(ParameterSchema {
                schema_type: ParamType::Object,
                properties: self
                    .parameters
                    .iter()
                    .map(|p| {
                        (
                            p.name.clone(),
                            PropertySchema {
                                property_type: p.param_type,
                                description: p.description.clone(),
                            },
                        )
                    })
                    .collect(),
                required: self
                    .parameters
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name.clone())
                    .collect(),
            })
        };
        FunctionDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Function-calling declaration of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ParameterSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: ParamType,
    /// Keyed by parameter name, in declaration order.
    pub properties: IndexMap<String, PropertySchema>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub property_type: ParamType,
    pub description: String,
}

/// Name-keyed tool registry.
#[derive(Debug, Default)]
pub struct ToolDispatcher {
    tools: Vec<ToolDefinition>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: ToolDefinition) {
        match self.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => {
                tracing::warn!("Replacing previously registered tool: {}", tool.name);
                *existing = tool;
            }
            None => {
                tracing::info!("Registered tool: {}", tool.name);
                self.tools.push(tool);
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for every registered tool, in registration order.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools.iter().map(ToolDefinition::declaration).collect()
    }

    /// Runs a tool by name. Failures come back as `{"error": ...}` rather than `Err`.
    pub async fn execute(&self, name: &str, args: ToolArgs) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return error_result(format!("Unknown tool: {name}"));
        };

        if let Some(missing) = tool
            .parameters
            .iter()
            .find(|p| p.required && !args.contains_key(&p.name))
        {
            return error_result(format!("Missing required argument: {}", missing.name));
        }

        // The handler is invoked inside the guarded future so a panic while
        // building it is caught too.
        let run = AssertUnwindSafe(async { (tool.handler)(args).await }).catch_unwind();
        let Ok(outcome) = run.await else {
            tracing::error!("Tool '{}' panicked", name);
            return error_result(format!("Tool execution failed: {name} panicked"));
        };
        match outcome {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = ToolResult::new();
                map.insert("result".to_string(), other);
                map
            }
            Err(e) => {
                tracing::error!("Tool '{}' failed: {:#}", name, e);
                error_result(format!("Tool execution failed: {e}"))
            }
        }
    }
}

fn error_result(message: String) -> ToolResult {
    let mut map = ToolResult::new();
    map.insert("error".to_string(), json!(message));
    map
}

/// Reads a required string argument.
pub(crate) fn string_arg(args: &ToolArgs, name: &str) -> anyhow::Result<String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("argument '{name}' must be a string"))
}
