use crate::conversation::DEFAULT_GREETING;
use crate::error::{ChatError, ChatResult};
use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_API_URL: &str = "https://you-education.devasheeshmishra.com";
pub const DEFAULT_FAILURE_MESSAGE: &str = "Sorry, I couldn't process your request. Please try again.";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

const KEYRING_SERVICE_PREFIX: &str = "exam_chat_api_key";

// Environment variables read by `ChatConfig::from_env`
const ENV_API_URL: &str = "EXAM_CHAT_API_URL";
const ENV_EXAM_ID: &str = "EXAM_CHAT_EXAM_ID";
const ENV_REFERENCES: &str = "EXAM_CHAT_REFERENCES";
const ENV_API_KEY_REF: &str = "EXAM_CHAT_API_KEY_REF";

// Settings for one exam chat view
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub api_url: String, // Base URL of the backend
    pub exam_id: String,
    pub reference_ids: Vec<String>, // References the assistant may draw on
    // 'env:MY_API_KEY', 'keyring', or none for an open endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
    pub connect_timeout_secs: u64,
    pub failure_message: String, // Shown in place of a failed reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            exam_id: String::new(),
            reference_ids: Vec::new(),
            api_key_ref: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
            greeting: None,
        }
    }
}

impl ChatConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ChatConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        log::info!("Loaded chat config for exam {} from {}", config.exam_id, path.display());
        Ok(config)
    }

    /// Builds a config from `EXAM_CHAT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ChatConfig::default();
        if let Some(url) = lookup(ENV_API_URL) {
            config.api_url = url;
        }
        config.exam_id = lookup(ENV_EXAM_ID)
            .with_context(|| format!("Environment variable {} is not set", ENV_EXAM_ID))?;
        if let Some(refs) = lookup(ENV_REFERENCES) {
            config.reference_ids = refs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.api_key_ref = lookup(ENV_API_KEY_REF);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChatResult<()> {
        if self.api_url.trim().is_empty() {
            return Err(ChatError::Config("api_url cannot be empty".to_string()));
        }
        if self.exam_id.trim().is_empty() {
            return Err(ChatError::Config("exam_id cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn greeting(&self) -> &str {
        self.greeting.as_deref().unwrap_or(DEFAULT_GREETING)
    }
}

// --- API Key Retrieval ---

/// Resolves the bearer key named by `api_key_ref`, if any.
pub fn get_api_key(config: &ChatConfig) -> Result<Option<String>> {
    match config.api_key_ref.as_deref() {
        None => Ok(None),
        Some(ref_str) if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name)
                .map(Some)
                .with_context(|| format!("Failed to get API key from environment variable '{}'", env_var_name))
        }
        Some("keyring") => {
            let service_name = format!("{}-{}", KEYRING_SERVICE_PREFIX, config.exam_id);
            let entry = Entry::new(&service_name, &config.exam_id).context("Failed to create keyring entry")?;
            log::debug!("Retrieving API key from keyring for service: {}", service_name);
            entry
                .get_password()
                .map(Some)
                .with_context(|| format!("Failed to get API key from keyring for exam '{}'", config.exam_id))
        }
        Some(other) => Err(anyhow::anyhow!("Unsupported api_key_ref format: {}", other)),
    }
}

/// Stores an API key in the OS keyring for the configured exam.
pub fn set_api_key_in_keyring(config: &ChatConfig, api_key: &str) -> Result<()> {
    let service_name = format!("{}-{}", KEYRING_SERVICE_PREFIX, config.exam_id);
    let entry = Entry::new(&service_name, &config.exam_id).context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for service: {}", service_name);
    entry
        .set_password(api_key)
        .with_context(|| format!("Failed to set API key in keyring for exam '{}'", config.exam_id))
}
