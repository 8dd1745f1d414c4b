use std::env;

use crate::backoff::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Static settings injected into the session controller.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_attempts: u32,
    pub port: u16,
}

impl StudioConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            port: 8080,
        }
    }

    /// Reads the process environment. Call `dotenv::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let mut config = Self::new(api_key);
        if let Some(base) = lookup("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("GEMINI_IMAGE_MODEL") {
            config.model = model;
        }
        if let Some(raw) = lookup("GEMINI_MAX_ATTEMPTS") {
            config.max_attempts = raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or(ConfigError::Invalid { var: "GEMINI_MAX_ATTEMPTS", value: raw })?;
        }
        if let Some(raw) = lookup("PORT") {
            config.port = raw.parse().map_err(|_| ConfigError::Invalid { var: "PORT", value: raw })?;
        }
        Ok(config)
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent?key={}", self.api_base, self.model, self.api_key)
    }
}
