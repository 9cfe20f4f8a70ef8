use crate::generic_types::{NormalizedMessage, ToolResult};
use crate::tools::FunctionDeclaration;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How eagerly the remote service decides the user started or stopped speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VadSensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl VadSensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for VadSensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VadSensitivity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(format!(
                "invalid vad_sensitivity '{other}'. Must be one of: LOW, MEDIUM, HIGH"
            )),
        }
    }
}

/// Everything a session needs to open. Built fresh for each connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub system_prompt: String,
    pub tools: Vec<FunctionDeclaration>,
    pub vad_sensitivity: VadSensitivity,
}

/// A bidirectional, real-time conversation with a remote speech/LLM service.
///
/// Implementations use interior mutability so the controller, the capture pipeline
/// and the receive loop can share one handle for the length of a conversation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RealtimeSession: Send + Sync {
    /// Opens the connection and sends the session setup.
    async fn connect(&self) -> Result<()>;

    /// Sends one frame of 16-bit PCM microphone audio.
    async fn send_audio(&self, frame: Vec<u8>) -> Result<()>;

    /// Answers a tool call identified by `call_id`.
    async fn send_tool_response(&self, call_id: &str, result: ToolResult) -> Result<()>;

    /// Returns the inbound message stream. It ends when the remote side closes;
    /// a transport failure shows up as a single `NormalizedMessage::Error`.
    async fn receive(&self) -> Result<tokio::sync::mpsc::Receiver<NormalizedMessage>>;

    /// Closes the session. Safe to call more than once.
    async fn close(&self);

    fn is_connected(&self) -> bool;
}

/// Creates unconnected sessions for a given credential and configuration.
#[cfg_attr(test, automock)]
pub trait SessionFactory: Send + Sync {
    fn create(&self, api_key: &SecretString, config: SessionConfig) -> Arc<dyn RealtimeSession>;
}
