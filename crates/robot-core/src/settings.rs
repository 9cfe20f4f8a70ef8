use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the controller and its pipelines.
///
/// This is a plain value; reading it from the environment is the binary's job.
#[derive(Debug, Clone)]
pub struct RobotSettings {
    pub api_key: SecretString,
    pub model: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub input_channels: u16,
    /// Bytes per microphone frame.
    pub audio_chunk_size: usize,
    pub wake_word: String,
    pub wake_word_sensitivity: f32,
    pub default_personality: String,
    pub personalities_dir: PathBuf,
    /// Silence timeout used until a personality overrides it.
    pub conversation_timeout: Duration,
    pub max_session_duration: Duration,
    /// How often the conversation timeout monitor checks for silence.
    pub timeout_poll_interval: Duration,
}

impl RobotSettings {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            model: "gemini-2.5-flash-preview-native-audio-dialog".to_string(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            input_channels: 1,
            audio_chunk_size: 1024,
            wake_word: "hey robot".to_string(),
            wake_word_sensitivity: 0.5,
            default_personality: "friendly".to_string(),
            personalities_dir: PathBuf::from("config/personalities"),
            conversation_timeout: Duration::from_secs(30),
            max_session_duration: Duration::from_secs(600),
            timeout_poll_interval: Duration::from_secs(1),
        }
    }
}
