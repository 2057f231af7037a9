use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::classifier::default_vision_keywords;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Network
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // Video/call provider
    #[serde(default = "default_video_api_url")]
    pub video_api_url: String,
    #[serde(default = "default_call_type")]
    pub call_type: String,
    #[serde(default = "default_agent_user_id")]
    pub agent_user_id: String,

    // Chat/vision provider (OpenAI-compatible)
    #[serde(default = "default_openai_api_url")]
    pub openai_api_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_chat_max_tokens")]
    pub chat_max_tokens: u32,
    #[serde(default = "default_vision_max_tokens")]
    pub vision_max_tokens: u32,

    // Vision question detection
    #[serde(default = "default_vision_keywords")]
    pub vision_keywords: Vec<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_video_api_url() -> String {
    "https://video.stream-io-api.com".to_string()
}

fn default_call_type() -> String {
    "default".to_string()
}

fn default_agent_user_id() -> String {
    "lexi_ai".to_string()
}

fn default_openai_api_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o".to_string()
}

fn default_chat_max_tokens() -> u32 {
    400
}

fn default_vision_max_tokens() -> u32 {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            video_api_url: default_video_api_url(),
            call_type: default_call_type(),
            agent_user_id: default_agent_user_id(),
            openai_api_url: default_openai_api_url(),
            chat_model: default_chat_model(),
            vision_model: default_vision_model(),
            chat_max_tokens: default_chat_max_tokens(),
            vision_max_tokens: default_vision_max_tokens(),
            vision_keywords: default_vision_keywords(),
        }
    }
}

impl AppConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Path to the config file (next to the executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("lexi_config.toml")
    }

    /// Load config from lexi_config.toml, falling back to defaults + env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::info!("No config file found, using defaults + env vars");
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = env::var("LEXI_BIND") {
            self.bind_addr = addr;
        }
        if let Ok(url) = env::var("STREAM_VIDEO_API_URL") {
            self.video_api_url = url;
        }
        if let Ok(url) = env::var("OPENAI_API_URL") {
            self.openai_api_url = url;
        }
        if let Ok(model) = env::var("LEXI_CHAT_MODEL") {
            self.chat_model = model;
        }
        if let Ok(model) = env::var("LEXI_VISION_MODEL") {
            self.vision_model = model;
        }
        if let Ok(agent) = env::var("LEXI_AGENT_USER_ID") {
            if !agent.trim().is_empty() {
                self.agent_user_id = agent;
            }
        }
        self
    }
}

/// Required provider credentials, read once at startup. A missing key is
/// fatal before the listener binds.
#[derive(Clone)]
pub struct Credentials {
    pub stream_api_key: String,
    pub stream_api_secret: String,
    pub openai_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            stream_api_key: required_env("STREAM_API_KEY")?,
            stream_api_secret: required_env("STREAM_API_SECRET")?,
            openai_api_key: required_env("OPENAI_API_KEY")?,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("Missing required env var {name}"))?;
    if value.trim().is_empty() {
        anyhow::bail!("Required env var {name} is empty");
    }
    Ok(value)
}
