use super::consts;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    base_url: String,
    api_key: SecretString,
    model: String,
    connect_timeout: Duration,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.config.api_key = api_key;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout = connect_timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Defaults, with the API key taken from `GEMINI_API_KEY` when set.
    pub fn new() -> Self {
        Self {
            base_url: consts::BASE_URL.to_string(),
            api_key: std::env::var(consts::GEMINI_API_KEY)
                .unwrap_or_default()
                .into(),
            model: consts::DEFAULT_MODEL.to_string(),
            connect_timeout: consts::CONNECT_TIMEOUT,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Model name in the `models/...` form the setup message expects.
    pub fn qualified_model(&self) -> String {
        if self.model.starts_with(consts::MODEL_PREFIX) {
            self.model.clone()
        } else {
            format!("{}{}", consts::MODEL_PREFIX, self.model)
        }
    }

    /// The WebSocket URL including the credential. Never log this.
    pub(crate) fn connect_url(&self) -> String {
        let key = self.api_key.expose_secret();
        if key.is_empty() {
            return self.base_url.clone();
        }
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}={}",
            self.base_url,
            separator,
            consts::API_KEY_QUERY_PARAM,
            key
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
