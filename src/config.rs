//! Configuration types for the chat client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default system instruction given to the chat model.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly and helpful AI chatbot named Lucero AI. \
Your previous name was RuleBot, but you've been upgraded with a powerful AI model. \
Keep your responses concise and conversational.";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LuceroConfig {
    /// Audio output settings.
    pub audio: AudioConfig,
    /// Remote chat model settings.
    pub chat: ChatConfig,
    /// Remote text-to-speech settings.
    pub tts: TtsConfig,
    /// Conversation history storage settings.
    pub storage: StorageConfig,
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the TTS payload and of the output device, in Hz.
    pub sample_rate: u32,
    /// Channel count of the TTS payload (1 = mono).
    pub channels: u16,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            output_device: None,
        }
    }
}

/// Remote chat model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// API key. When empty, `GEMINI_API_KEY` and then `API_KEY` are consulted.
    pub api_key: String,
    /// API base URL, including the version path segment.
    pub base_url: String,
    /// Chat model identifier.
    pub model: String,
    /// System instruction sent with every turn.
    pub system_instruction: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            model: "gemini-2.5-flash".to_owned(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_owned(),
            request_timeout_secs: 60,
        }
    }
}

impl ChatConfig {
    /// Resolve the API key from config, falling back to the environment.
    ///
    /// Returns `None` when no non-blank key is available anywhere.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_owned());
        }
        ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().to_owned())
            .find(|v| !v.is_empty())
    }
}

/// Remote text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Whether replies are spoken at startup.
    pub enabled: bool,
    /// TTS model identifier.
    pub model: String,
    /// Prebuilt voice name.
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-2.5-flash-preview-tts".to_owned(),
            voice: "Kore".to_owned(),
        }
    }
}

/// Conversation history storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store directory (None = `<data dir>/store`).
    pub dir: Option<PathBuf>,
    /// Key under which the message log is saved.
    pub history_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            history_key: "chatMessages".to_owned(),
        }
    }
}

impl StorageConfig {
    /// The effective store directory.
    #[must_use]
    pub fn effective_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| crate::paths::data_dir().join("store"))
    }
}

impl LuceroConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ChatError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_dir().join("config.toml")
    }
}
