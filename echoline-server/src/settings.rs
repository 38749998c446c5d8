//! Server settings (JSON file, then environment overrides).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use echoline_core::{AudioFormat, SessionConfig, VadConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9093";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
    /// `deepgram` or `stub`.
    pub backend: String,
    pub max_concurrent_calls: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_bytes: usize,
    pub volume_threshold: f32,
    pub min_speech_ms: u64,
    pub silence_ms: u64,
    /// 0 disables the forced finalize.
    pub max_utterance_ms: u64,
    pub deepgram_api_key: Option<String>,
    pub deepgram_base_url: Option<String>,
    pub tts_model: String,
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            backend: "deepgram".into(),
            max_concurrent_calls: 16,
            sample_rate: 8_000,
            channels: 1,
            frame_bytes: 320,
            volume_threshold: 30.0,
            min_speech_ms: 500,
            silence_ms: 1_500,
            max_utterance_ms: 30_000,
            deepgram_api_key: None,
            deepgram_base_url: None,
            tts_model: "aura-asteria-en".into(),
            request_timeout_ms: 20_000,
        }
    }
}

impl ServerSettings {
    pub fn normalize(&mut self) {
        self.listen_addr = self.listen_addr.trim().to_string();
        if self.listen_addr.is_empty() {
            self.listen_addr = DEFAULT_LISTEN_ADDR.into();
        }
        self.backend = normalize_backend(&self.backend);
        self.max_concurrent_calls = self.max_concurrent_calls.clamp(1, 1024);
        self.channels = self.channels.clamp(1, 2);
        self.volume_threshold = if self.volume_threshold.is_finite() {
            self.volume_threshold.clamp(0.0, f32::from(i16::MAX))
        } else {
            30.0
        };
        self.min_speech_ms = self.min_speech_ms.clamp(20, 10_000);
        self.silence_ms = self.silence_ms.clamp(20, 30_000);
        if self.max_utterance_ms != 0 {
            self.max_utterance_ms = self.max_utterance_ms.max(self.min_speech_ms);
        }
        self.deepgram_api_key = trimmed(self.deepgram_api_key.take());
        self.deepgram_base_url = trimmed(self.deepgram_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.tts_model = self.tts_model.trim().to_string();
        if self.tts_model.is_empty() {
            self.tts_model = "aura-asteria-en".into();
        }
        self.request_timeout_ms = self.request_timeout_ms.clamp(1_000, 120_000);
    }

    /// Apply `ECHOLINE_*` and `DG_API_KEY` overrides, then re-normalize.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("ECHOLINE_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(backend) = lookup("ECHOLINE_BACKEND") {
            self.backend = backend;
        }
        if let Some(key) = lookup("DG_API_KEY") {
            self.deepgram_api_key = Some(key);
        }
        if let Some(model) = lookup("ECHOLINE_TTS_MODEL") {
            self.tts_model = model;
        }
        parse_into(&lookup, "ECHOLINE_MAX_CALLS", &mut self.max_concurrent_calls);
        parse_into(&lookup, "ECHOLINE_VOLUME_THRESHOLD", &mut self.volume_threshold);
        parse_into(&lookup, "ECHOLINE_MIN_SPEECH_MS", &mut self.min_speech_ms);
        parse_into(&lookup, "ECHOLINE_SILENCE_MS", &mut self.silence_ms);
        self.normalize();
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            format: AudioFormat {
                sample_rate: self.sample_rate,
                channels: self.channels,
                sample_width: 2,
                frame_bytes: self.frame_bytes,
            },
            vad: VadConfig {
                volume_threshold: self.volume_threshold,
                min_speech: Duration::from_millis(self.min_speech_ms),
                silence: Duration::from_millis(self.silence_ms),
                max_utterance: (self.max_utterance_ms > 0)
                    .then(|| Duration::from_millis(self.max_utterance_ms)),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub fn normalize_backend(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "stub" | "offline" | "tone" => "stub".into(),
        _ => "deepgram".into(),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable override"),
    }
}

pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os("ECHOLINE_SETTINGS") {
        return PathBuf::from(path);
    }
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("echoline")
        .join("settings.json")
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> ServerSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<ServerSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "settings file is not valid JSON — using defaults");
            ServerSettings::default()
        }),
        Err(_) => ServerSettings::default(),
    };
    settings.normalize();
    settings
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_the_line_format() {
        let config = ServerSettings::default().session_config();
        assert_eq!(config, SessionConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: ServerSettings =
            serde_json::from_str(r#"{ "backend": "stub", "silenceMs": 800 }"#).unwrap();
        assert_eq!(settings.backend, "stub");
        assert_eq!(settings.silence_ms, 800);
        assert_eq!(settings.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(settings.frame_bytes, 320);
    }

    #[test]
    fn normalize_clamps_and_trims() {
        let mut settings = ServerSettings {
            listen_addr: "   ".into(),
            backend: " Offline ".into(),
            max_concurrent_calls: 0,
            min_speech_ms: 1_000,
            max_utterance_ms: 200,
            deepgram_api_key: Some("  ".into()),
            deepgram_base_url: Some(" http://localhost:8080/ ".into()),
            ..ServerSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(settings.backend, "stub");
        assert_eq!(settings.max_concurrent_calls, 1);
        assert_eq!(settings.max_utterance_ms, 1_000);
        assert_eq!(settings.deepgram_api_key, None);
        assert_eq!(
            settings.deepgram_base_url.as_deref(),
            Some("http://localhost:8080")
        );
    }

    #[test]
    fn zero_max_utterance_disables_forced_finalize() {
        let settings = ServerSettings {
            max_utterance_ms: 0,
            ..ServerSettings::default()
        };
        assert_eq!(settings.session_config().vad.max_utterance, None);
    }

    #[test]
    fn env_overrides_win_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("DG_API_KEY", " secret "),
            ("ECHOLINE_BACKEND", "stub"),
            ("ECHOLINE_SILENCE_MS", "900"),
            ("ECHOLINE_MAX_CALLS", "lots"),
        ]
        .into_iter()
        .collect();

        let mut settings = ServerSettings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.deepgram_api_key.as_deref(), Some("secret"));
        assert_eq!(settings.backend, "stub");
        assert_eq!(settings.silence_ms, 900);
        assert_eq!(settings.max_concurrent_calls, 16);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let settings = load_settings(Path::new("/nonexistent/echoline/settings.json"));
        assert_eq!(settings, ServerSettings::default());
    }
}
