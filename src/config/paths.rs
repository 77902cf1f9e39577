//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\voiceturn\
//!   macOS:   ~/Library/Application Support/voiceturn/
//!   Linux:   ~/.config/voiceturn/
//!
//! Data dir (audio working files):
//!   Windows: %LOCALAPPDATA%\voiceturn\
//!   macOS:   ~/Library/Application Support/voiceturn/
//!   Linux:   ~/.local/share/voiceturn/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Directory for the capture/reply audio working files.
    pub audio_dir: PathBuf,
    /// Where the microphone recording is written when a capture stops.
    ///
    /// A single slot: each new recording overwrites the previous one.
    pub capture_file: PathBuf,
    /// Where the synthesized reply clip is written before playback.
    ///
    /// Also a single slot — one clip exists at a time.
    pub reply_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "voiceturn";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path (should be extremely rare in practice).
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let audio_dir = data_dir.join("audio");
        let capture_file = audio_dir.join("capture.wav");
        let reply_file = audio_dir.join("reply.mp3");

        Self {
            config_dir,
            settings_file,
            audio_dir,
            capture_file,
            reply_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
