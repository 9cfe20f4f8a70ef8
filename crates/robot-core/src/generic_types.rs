use serde_json::{Map, Value};

/// Arguments of a tool call, and the result map sent back for it.
pub type ToolArgs = Map<String, Value>;
pub type ToolResult = Map<String, Value>;

/// Provider-neutral messages that any real-time session emits back to the controller.
///
/// The controller only ever matches on these variants; translating the provider's
/// wire events into this closed set is the job of the session adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedMessage {
    SetupComplete,
    /// Raw PCM16 audio spoken by the model.
    Audio(Vec<u8>),
    /// Text of what the model said.
    Transcription(String),
    /// Text of what the user said.
    InputTranscription(String),
    TurnComplete,
    /// The user started talking over the model (barge-in).
    Interrupted,
    ToolCall {
        call_id: String,
        name: String,
        args: ToolArgs,
    },
    ToolCallCancellation(Vec<String>),
    /// The service is about to terminate the session.
    GoAway,
    Error(String),
}

impl NormalizedMessage {
    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetupComplete => "setup_complete",
            Self::Audio(_) => "audio",
            Self::Transcription(_) => "transcription",
            Self::InputTranscription(_) => "input_transcription",
            Self::TurnComplete => "turn_complete",
            Self::Interrupted => "interrupted",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolCallCancellation(_) => "tool_call_cancellation",
            Self::GoAway => "go_away",
            Self::Error(_) => "error",
        }
    }

    /// Whether the receive loop must stop after handling this message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::GoAway | Self::Error(_))
    }
}
