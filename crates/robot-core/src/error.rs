/// Typed failures raised by the core. Operational seams wrap these in `anyhow`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("realtime session is not connected")]
    NotConnected,
    #[error("audio {0} stream is not open")]
    StreamNotOpen(&'static str),
    #[error("camera is not available")]
    CameraUnavailable,
    #[error("voice '{name}' not found. Available voices: {available}")]
    UnknownVoice { name: String, available: String },
    #[error("personality '{source_name}' is invalid: {reason}")]
    InvalidPersonality { source_name: String, reason: String },
    #[error("personality '{name}' not found. Available: {available}")]
    UnknownPersonality { name: String, available: String },
}
