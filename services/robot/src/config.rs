//! Application Configuration Module
//!
//! Loads the robot's settings from environment variables (and an optional `.env`
//! file) into a single struct, then hands the core a plain `RobotSettings`.

use robot_core::RobotSettings;
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

// --- Application Constants ---

/// Capacity of the channel between the Live API reader task and the adapter.
pub const SERVER_EVENT_CAPACITY: usize = 1024;
/// How much audio the speaker ring buffer holds, in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 2000;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub gemini_model: String,
    pub gemini_base_url: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub input_channels: u16,
    pub audio_chunk_size: usize,
    pub wake_word: String,
    pub wake_word_sensitivity: f32,
    pub default_personality: String,
    pub personalities_dir: PathBuf,
    pub conversation_timeout: Duration,
    pub max_session_duration: Duration,
    pub user_tools_dir: PathBuf,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// *   `GEMINI_API_KEY`: required.
    /// *   `GEMINI_MODEL`, `GEMINI_BASE_URL`: optional overrides for the Live API.
    /// *   `INPUT_SAMPLE_RATE`, `OUTPUT_SAMPLE_RATE`, `INPUT_CHANNELS`, `AUDIO_CHUNK_SIZE`.
    /// *   `WAKE_WORD`, `WAKE_WORD_SENSITIVITY`.
    /// *   `DEFAULT_PERSONALITY`, `PERSONALITIES_DIR`, `USER_TOOLS_DIR`.
    /// *   `CONVERSATION_TIMEOUT`, `MAX_SESSION_DURATION`: seconds.
    /// *   `LOG_LEVEL`: fallback when `RUST_LOG` is not set. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = RobotSettings::new(SecretString::from(String::new()));

        let gemini_api_key = get("GEMINI_API_KEY")
            .map(SecretString::from)
            .ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;

        Ok(Self {
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.model),
            gemini_base_url: get("GEMINI_BASE_URL"),
            input_sample_rate: parse_or(&get, "INPUT_SAMPLE_RATE", defaults.input_sample_rate)?,
            output_sample_rate: parse_or(&get, "OUTPUT_SAMPLE_RATE", defaults.output_sample_rate)?,
            input_channels: parse_or(&get, "INPUT_CHANNELS", defaults.input_channels)?,
            audio_chunk_size: parse_or(&get, "AUDIO_CHUNK_SIZE", defaults.audio_chunk_size)?,
            wake_word: get("WAKE_WORD").unwrap_or(defaults.wake_word),
            wake_word_sensitivity: parse_sensitivity(&get)?,
            default_personality: get("DEFAULT_PERSONALITY").unwrap_or(defaults.default_personality),
            personalities_dir: get("PERSONALITIES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.personalities_dir),
            conversation_timeout: Duration::from_secs(parse_or(
                &get,
                "CONVERSATION_TIMEOUT",
                defaults.conversation_timeout.as_secs(),
            )?),
            max_session_duration: Duration::from_secs(parse_or(
                &get,
                "MAX_SESSION_DURATION",
                defaults.max_session_duration.as_secs(),
            )?),
            user_tools_dir: get("USER_TOOLS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/tools")),
            log_level: parse_or(&get, "LOG_LEVEL", Level::INFO)?,
        })
    }

    /// The core's view of this configuration.
    pub fn into_settings(self) -> RobotSettings {
        RobotSettings {
            model: self.gemini_model,
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            input_channels: self.input_channels,
            audio_chunk_size: self.audio_chunk_size,
            wake_word: self.wake_word,
            wake_word_sensitivity: self.wake_word_sensitivity,
            default_personality: self.default_personality,
            personalities_dir: self.personalities_dir,
            conversation_timeout: self.conversation_timeout,
            max_session_duration: self.max_session_duration,
            ..RobotSettings::new(self.gemini_api_key)
        }
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

fn parse_sensitivity<G>(get: &G) -> Result<f32, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    const NAME: &str = "WAKE_WORD_SENSITIVITY";
    let value: f32 = parse_or(get, NAME, 0.5)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            name: NAME,
            value: value.to_string(),
        });
    }
    Ok(value)
}
