//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// Settings for the remote speech + chat provider.
///
/// The three endpoints speak the OpenAI wire formats (`/v1/audio/transcriptions`,
/// `/v1/chat/completions`, `/v1/audio/speech`) but nothing is hardcoded —
/// any compatible provider works by pointing the URLs elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Speech-to-text endpoint (multipart upload).
    pub transcription_url: String,
    /// Chat-completion endpoint (JSON).
    pub completions_url: String,
    /// Text-to-speech endpoint (JSON in, raw audio out).
    pub speech_url: String,
    /// Bearer token sent on every request — `None` until the user configures
    /// one.  Requests will be rejected by the provider without it.
    pub api_key: Option<String>,
    /// Transcription model identifier (e.g. `"whisper-1"`).
    pub transcription_model: String,
    /// Chat model identifier.
    pub chat_model: String,
    /// Speech-synthesis model identifier.
    pub speech_model: String,
    /// Default synthesis voice; individual turns may override it.
    pub voice: String,
    /// Spoken-language hint passed to transcription as an ISO-639-1 code.
    pub language: String,
    /// Optional per-request timeout in seconds.
    ///
    /// `None` (the default) means requests never time out on their own and
    /// only end via completion or cancellation.
    pub timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            transcription_url: "https://api.openai.com/v1/audio/transcriptions".into(),
            completions_url: "https://api.openai.com/v1/chat/completions".into(),
            speech_url: "https://api.openai.com/v1/audio/speech".into(),
            api_key: None,
            transcription_model: "whisper-1".into(),
            chat_model: "gpt-4-1106-preview".into(),
            speech_model: "tts-1-hd".into(),
            voice: "shimmer".into(),
            language: "en".into(),
            timeout_secs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Audio input device name — `None` means the system default.
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { input_device: None }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voiceturn::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote provider settings.
    pub api: ApiConfig,
    /// Microphone capture settings.
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
