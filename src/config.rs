//! Application configuration
//!
//! Loaded from a TOML file; every field has a default, so a missing file or a
//! partial one is fine. The API key never lives in the file: it is read from
//! the environment variable named by `session.api_key_env`.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::SetupConfig;
use crate::tools::UnknownToolPolicy;
use crate::video::SamplerConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSettings,
    pub audio: AudioSettings,
    pub video: VideoSettings,
    pub startup: StartOptions,
}

/// Connection and setup-frame settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub endpoint: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub unknown_tools: UnknownToolPolicy,
    pub setup: SetupConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            unknown_tools: UnknownToolPolicy::default(),
            setup: SetupConfig::default(),
        }
    }
}

/// Microphone and speaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// `input:<name>`; empty or absent selects the default microphone
    pub input_device: Option<String>,
    /// `output:<name>`; empty or absent selects the default speaker
    pub output_device: Option<String>,
    pub capture_rate: u32,
    pub chunk_samples: usize,
    pub output_rate: u32,
    pub silence_threshold: f32,
    pub drop_silence: bool,
    pub cancel_ramp_ms: u32,
    pub volume: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            capture_rate: CAPTURE_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            output_rate: PLAYBACK_SAMPLE_RATE,
            silence_threshold: SILENCE_THRESHOLD,
            drop_silence: true,
            cancel_ramp_ms: DEFAULT_CANCEL_RAMP_MS,
            volume: 1.0,
        }
    }
}

impl AudioSettings {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            device_id: self.input_device.clone(),
            sample_rate: self.capture_rate,
            chunk_samples: self.chunk_samples,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.output_rate,
            silence_threshold: self.silence_threshold,
            drop_silence: self.drop_silence,
            cancel_ramp_ms: self.cancel_ramp_ms,
            volume: self.volume,
        }
    }
}

/// Camera sampling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub interval_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl VideoSettings {
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_millis(self.interval_ms.max(1)),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

/// Whether capture starts by itself once the session is connected, or only
/// when the user asks for it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    pub auto_start_microphone: bool,
    pub auto_start_camera: bool,
}

impl AppConfig {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = toml::from_str(&contents)?;
                config.validate()?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::FileRead(e)),
        }
    }

    /// Reject settings the audio pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.capture_rate == 0 {
            return Err(ConfigError::Invalid("audio.capture_rate must be > 0".into()));
        }
        if audio.output_rate == 0 {
            return Err(ConfigError::Invalid("audio.output_rate must be > 0".into()));
        }
        if audio.chunk_samples == 0 {
            return Err(ConfigError::Invalid("audio.chunk_samples must be > 0".into()));
        }
        Ok(())
    }

    /// Load from the per-user config directory
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// `<config dir>/live-media-session/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "live-media-session")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Endpoint with the API key attached as the `key` query parameter
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let key = std::env::var(&self.session.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.session.api_key_env.clone()))?;
        self.endpoint_url_with_key(&key)
    }

    pub fn endpoint_url_with_key(&self, key: &str) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.session.endpoint)?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.audio.capture_rate, 16_000);
        assert_eq!(config.audio.output_rate, 24_000);
        assert_eq!(config.video.interval_ms, 1000);
        assert!(!config.startup.auto_start_microphone);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[session]
unknown_tools = "reply_error"

[session.setup]
voice_name = "Kore"

[[session.setup.function_declarations]]
name = "get_weather"
description = "Current weather"

[startup]
auto_start_microphone = true
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.session.unknown_tools, UnknownToolPolicy::ReplyError);
        assert_eq!(config.session.setup.voice_name, "Kore");
        assert_eq!(config.session.setup.language_code, "en-US");
        assert_eq!(
            config.session.setup.function_declarations[0]["name"],
            "get_weather"
        );
        assert!(config.startup.auto_start_microphone);
        assert!(!config.startup.auto_start_camera);
        assert_eq!(config.audio.chunk_samples, DEFAULT_CHUNK_SAMPLES);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio\nvolume = ").unwrap();
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_rates_rejected() {
        for (key, value) in [("capture_rate", "0"), ("output_rate", "0"), ("chunk_samples", "0")] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "[audio]\n{} = {}", key, value).unwrap();
            match AppConfig::load(file.path()) {
                Err(ConfigError::Invalid(message)) => assert!(message.contains(key)),
                other => panic!("{} = 0 accepted: {:?}", key, other),
            }
        }
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.audio.volume = 0.5;
        config.startup.auto_start_camera = true;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_endpoint_carries_key() {
        let config = AppConfig::default();
        let url = config.endpoint_url_with_key("abc 123").unwrap();
        assert_eq!(url.scheme(), "wss");
        let key = url
            .query_pairs()
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned());
        assert_eq!(key.as_deref(), Some("abc 123"));
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = AppConfig::default();
        config.session.api_key_env = "LIVE_MEDIA_SESSION_TEST_UNSET_KEY".into();
        assert!(matches!(
            config.endpoint_url(),
            Err(ConfigError::MissingApiKey(_))
        ));
    }
}
