use std::env;

use crate::core::catalog::DEFAULT_MODEL;
use crate::core::error::ChatError;

pub const DEFAULT_API_HOSTNAME: &str = "https://api.groq.com/openai";
pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a helpful, intelligent AI assistant. Be concise, accurate, and friendly.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_hostname: String,
    pub api_key: String,
    pub model: String,
    pub system_message: String,
}

impl AppConfig {
    /// Reads the config from `CHATLINE_*` environment variables. The
    /// API key has no default and must be provided.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup so callers (and tests)
    /// don't need to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("CHATLINE_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ChatError::MissingApiKey)?;
        let api_hostname =
            lookup("CHATLINE_API_HOST").unwrap_or_else(|| DEFAULT_API_HOSTNAME.to_string());
        let model = lookup("CHATLINE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let system_message = lookup("CHATLINE_SYSTEM_MESSAGE")
            .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string());

        Ok(Self {
            api_hostname,
            api_key,
            model,
            system_message,
        })
    }
}
