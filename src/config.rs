use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::audio::notes::hz_tolerance_to_cents;
use crate::audio::{DetectorSettings, PatternSettings, PeakPolicy};
use crate::melody::{MelodySettings, MelodyStep};
use crate::monitor::LoopSettings;
use crate::pipeline::PipelineSettings;
use crate::sink::WebhookSettings;

/// Home Assistant add-on options file.
pub const ADDON_OPTIONS_PATH: &str = "/data/options.json";
pub const ENV_PREFIX: &str = "CHIMEWATCH_";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("{0} must not be negative")]
    Negative(&'static str),
    #[error("detection.noise_floor must be within (0, 1), got {0}")]
    NoiseFloor(f32),
    #[error("detection band is empty: {0} Hz .. {1} Hz")]
    Band(f32, f32),
    #[error("melody is enabled but melody.sequence is empty")]
    EmptyMelody,
    #[error("invalid value for {key}: `{value}`")]
    Env { key: String, value: String },
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub melody: MelodyConfig,
    #[serde(default)]
    pub pattern: PatternConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per analysed frame (0.2 s at 44.1 kHz)
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default = "default_rms_threshold")]
    pub rms_threshold: f32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityUnit {
    #[default]
    Cents,
    Hz,
}

#[derive(Debug, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_true", alias = "enable_note_detection")]
    pub enabled: bool,
    #[serde(default = "default_note_sensitivity")]
    pub note_sensitivity: f32,
    #[serde(default)]
    pub sensitivity_unit: SensitivityUnit,
    #[serde(default = "default_min_frequency")]
    pub min_frequency: f32,
    #[serde(default = "default_max_frequency")]
    pub max_frequency: f32,
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f32,
    #[serde(default = "default_min_prominence")]
    pub min_prominence: f32,
    #[serde(default = "default_min_frame_len")]
    pub min_frame_len: usize,
    #[serde(default)]
    pub peak_policy: PeakPolicy,
}

#[derive(Debug, Deserialize)]
pub struct MelodyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sequence: Vec<MelodyStep>,
    #[serde(default = "default_step_window_secs")]
    pub step_window_secs: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    /// Reset whenever a cycle misses the expected note
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Deserialize)]
pub struct PatternConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_min_variation")]
    pub min_variation: f32,
    #[serde(default = "default_min_peaks")]
    pub min_peaks: usize,
    #[serde(default = "default_peak_ratio")]
    pub peak_ratio: f32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
}

#[derive(Debug, Deserialize)]
pub struct SinkConfig {
    /// Webhook endpoint; events go to stdout when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            frame_size: default_frame_size(),
            interval_ms: default_interval_ms(),
            gain: default_gain(),
            rms_threshold: default_rms_threshold(),
            read_timeout_ms: default_read_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            note_sensitivity: default_note_sensitivity(),
            sensitivity_unit: SensitivityUnit::Cents,
            min_frequency: default_min_frequency(),
            max_frequency: default_max_frequency(),
            noise_floor: default_noise_floor(),
            min_prominence: default_min_prominence(),
            min_frame_len: default_min_frame_len(),
            peak_policy: PeakPolicy::default(),
        }
    }
}

impl Default for MelodyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sequence: Vec::new(),
            step_window_secs: default_step_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            strict: false,
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            history_len: default_history_len(),
            min_variation: default_min_variation(),
            min_peaks: default_min_peaks(),
            peak_ratio: default_peak_ratio(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            topic: default_topic(),
            username: None,
            password: None,
            token: None,
            timeout_ms: default_sink_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_device() -> String { "plughw:1,2".into() }
fn default_sample_rate() -> u32 { 44_100 }
fn default_frame_size() -> usize { 8_820 }
fn default_interval_ms() -> u64 { 100 }
fn default_gain() -> f32 { 1.0 }
fn default_rms_threshold() -> f32 { 0.01 }
fn default_read_timeout_ms() -> u64 { 2_000 }
fn default_retry_delay_ms() -> u64 { 1_000 }
fn default_max_retry_delay_ms() -> u64 { 30_000 }
fn default_true() -> bool { true }
fn default_note_sensitivity() -> f32 { 25.0 }
fn default_min_frequency() -> f32 { 20.0 }
fn default_max_frequency() -> f32 { 5_000.0 }
fn default_noise_floor() -> f32 { 0.2 }
fn default_min_prominence() -> f32 { 8.0 }
fn default_min_frame_len() -> usize { 1_024 }
fn default_step_window_secs() -> f64 { 2.0 }
fn default_cooldown_secs() -> f64 { 10.0 }
fn default_history_len() -> usize { 20 }
fn default_min_variation() -> f32 { 0.3 }
fn default_min_peaks() -> usize { 3 }
fn default_peak_ratio() -> f32 { 1.2 }
fn default_topic() -> String { "chimewatch".into() }
fn default_sink_timeout_ms() -> u64 { 3_000 }
fn default_queue_capacity() -> usize { 64 }

/// Flat options written by the Home Assistant add-on supervisor.
#[derive(Debug, Default, Deserialize)]
pub struct AddonOptions {
    pub audio_device: Option<String>,
    pub gain: Option<f32>,
    pub rms_threshold: Option<f32>,
    pub enable_note_detection: Option<bool>,
    pub note_sensitivity: Option<f32>,
    pub target_melody: Option<Vec<MelodyStep>>,
    pub sink_url: Option<String>,
    pub sink_topic: Option<String>,
    pub sink_username: Option<String>,
    pub sink_password: Option<String>,
    pub sink_token: Option<String>,
}

impl AddonOptions {
    pub fn apply(self, config: &mut Config) {
        if let Some(v) = self.audio_device { config.audio.device = v; }
        if let Some(v) = self.gain { config.audio.gain = v; }
        if let Some(v) = self.rms_threshold { config.audio.rms_threshold = v; }
        if let Some(v) = self.enable_note_detection { config.detection.enabled = v; }
        if let Some(v) = self.note_sensitivity { config.detection.note_sensitivity = v; }
        if let Some(v) = self.target_melody {
            config.melody.enabled = !v.is_empty();
            config.melody.sequence = v;
        }
        if let Some(v) = self.sink_url { config.sink.url = Some(v); }
        if let Some(v) = self.sink_topic { config.sink.topic = v; }
        if let Some(v) = self.sink_username { config.sink.username = Some(v); }
        if let Some(v) = self.sink_password { config.sink.password = Some(v); }
        if let Some(v) = self.sink_token { config.sink.token = Some(v); }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(key: &str, value: String) -> Result<bool, ConfigError> {
    let lowered = value.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            key: key.to_string(),
            value,
        }),
    }
}

impl Config {
    /// Override fields from `CHIMEWATCH_*` variables, looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("AUDIO_DEVICE") { self.audio.device = v; }
        if let Some(v) = get("GAIN") { self.audio.gain = parse_env("GAIN", v)?; }
        if let Some(v) = get("RMS_THRESHOLD") {
            self.audio.rms_threshold = parse_env("RMS_THRESHOLD", v)?;
        }
        if let Some(v) = get("ENABLE_NOTE_DETECTION") {
            self.detection.enabled = parse_bool("ENABLE_NOTE_DETECTION", v)?;
        }
        if let Some(v) = get("NOTE_SENSITIVITY") {
            self.detection.note_sensitivity = parse_env("NOTE_SENSITIVITY", v)?;
        }
        if let Some(v) = get("SINK_URL") { self.sink.url = Some(v); }
        if let Some(v) = get("SINK_TOPIC") { self.sink.topic = v; }
        if let Some(v) = get("SINK_USERNAME") { self.sink.username = Some(v); }
        if let Some(v) = get("SINK_PASSWORD") { self.sink.password = Some(v); }
        if let Some(v) = get("SINK_TOKEN") { self.sink.token = Some(v); }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.audio;
        let d = &self.detection;
        if a.sample_rate == 0 { return Err(ConfigError::NotPositive("audio.sample_rate")); }
        if a.frame_size == 0 { return Err(ConfigError::NotPositive("audio.frame_size")); }
        if a.gain < 0.0 { return Err(ConfigError::Negative("audio.gain")); }
        if a.rms_threshold < 0.0 { return Err(ConfigError::Negative("audio.rms_threshold")); }
        if d.note_sensitivity <= 0.0 {
            return Err(ConfigError::NotPositive("detection.note_sensitivity"));
        }
        if !(d.noise_floor > 0.0 && d.noise_floor < 1.0) {
            return Err(ConfigError::NoiseFloor(d.noise_floor));
        }
        if d.min_frequency < 0.0 || d.min_frequency >= d.max_frequency {
            return Err(ConfigError::Band(d.min_frequency, d.max_frequency));
        }
        if self.melody.enabled && self.melody.sequence.is_empty() {
            return Err(ConfigError::EmptyMelody);
        }
        if self.melody.enabled && self.melody.step_window_secs <= 0.0 {
            return Err(ConfigError::NotPositive("melody.step_window_secs"));
        }
        if self.pattern.enabled && self.pattern.history_len < 3 {
            return Err(ConfigError::NotPositive("pattern.history_len (at least 3)"));
        }
        Ok(())
    }

    /// Note tolerance in cents, converting an Hz setting around A4.
    pub fn tolerance_cents(&self) -> f32 {
        match self.detection.sensitivity_unit {
            SensitivityUnit::Cents => self.detection.note_sensitivity,
            SensitivityUnit::Hz => hz_tolerance_to_cents(self.detection.note_sensitivity),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let d = &self.detection;
        PipelineSettings {
            gain: self.audio.gain,
            rms_threshold: self.audio.rms_threshold,
            note_detection: d.enabled,
            frame_len: self.audio.frame_size,
            detector: DetectorSettings {
                min_frame_len: d.min_frame_len,
                noise_floor: d.noise_floor,
                min_prominence: d.min_prominence,
                min_frequency: d.min_frequency,
                max_frequency: d.max_frequency,
                tolerance_cents: self.tolerance_cents(),
                policy: d.peak_policy,
            },
            melody: self.melody.enabled.then(|| MelodySettings {
                sequence: self.melody.sequence.clone(),
                step_window_secs: self.melody.step_window_secs,
                cooldown_secs: self.melody.cooldown_secs,
                strict: self.melody.strict,
            }),
            pattern: self.pattern.enabled.then(|| PatternSettings {
                history_len: self.pattern.history_len,
                min_variation: self.pattern.min_variation,
                min_peaks: self.pattern.min_peaks,
                peak_ratio: self.pattern.peak_ratio,
                cooldown_secs: self.pattern.cooldown_secs,
            }),
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_millis(self.audio.interval_ms),
            retry_delay: Duration::from_millis(self.audio.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.audio.max_retry_delay_ms),
            max_cycles: None,
        }
    }

    /// `None` when events should go to stdout.
    pub fn webhook_settings(&self) -> Option<WebhookSettings> {
        let s = &self.sink;
        s.url.as_ref().map(|url| WebhookSettings {
            url: url.clone(),
            topic: s.topic.clone(),
            username: s.username.clone(),
            password: s.password.clone(),
            token: s.token.clone(),
            timeout: Duration::from_millis(s.timeout_ms),
        })
    }
}

/// Load a TOML config, or add-on options when the file is JSON.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let options: AddonOptions = serde_json::from_str(&content)
            .with_context(|| format!("Invalid add-on options: {}", path.display()))?;
        let mut config = Config::default();
        options.apply(&mut config);
        Ok(config)
    } else {
        toml::from_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_listener() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.audio.device, "plughw:1,2");
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.frame_size, 8_820);
        assert!(config.detection.enabled);
        assert!(!config.melody.enabled);
        assert!(config.validate().is_ok());
        assert!(config.webhook_settings().is_none());
    }

    #[test]
    fn parses_full_toml() {
        let config: Config = toml::from_str(
            r#"
            [audio]
            device = "USB"
            gain = 2.5
            rms_threshold = 0.05

            [detection]
            enable_note_detection = true
            note_sensitivity = 10.0
            sensitivity_unit = "hz"
            min_frequency = 1400.0
            max_frequency = 2700.0
            peak_policy = "first_above_floor"

            [melody]
            enabled = true
            sequence = ["E6", "C6", "1400-2700"]
            cooldown_secs = 30.0
            strict = true

            [sink]
            url = "http://homeassistant.local:8123/api/webhook/laundry"
            token = "secret"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        let settings = config.pipeline_settings();
        assert_eq!(settings.gain, 2.5);
        assert_eq!(settings.detector.policy, PeakPolicy::FirstAboveFloor);
        assert!((settings.detector.tolerance_cents - 38.9).abs() < 0.1);
        let melody = settings.melody.unwrap();
        assert_eq!(melody.sequence.len(), 3);
        assert_eq!(melody.cooldown_secs, 30.0);
        assert_eq!(melody.step_window_secs, 2.0);
        assert!(melody.strict);

        let hook = config.webhook_settings().unwrap();
        assert_eq!(hook.topic, "chimewatch");
        assert_eq!(hook.token.as_deref(), Some("secret"));
    }

    #[test]
    fn bad_melody_step_fails_to_parse() {
        let result: Result<Config, _> = toml::from_str("[melody]\nsequence = [\"Q7\"]");
        assert!(result.is_err());
    }

    #[test]
    fn validation_catches_nonsense() {
        let mut config = Config::default();
        config.detection.noise_floor = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::NoiseFloor(1.5)));

        let mut config = Config::default();
        config.melody.enabled = true;
        assert_eq!(config.validate(), Err(ConfigError::EmptyMelody));

        let mut config = Config::default();
        config.detection.min_frequency = 3000.0;
        config.detection.max_frequency = 1000.0;
        assert!(matches!(config.validate(), Err(ConfigError::Band(..))));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<String, String> = [
            ("CHIMEWATCH_AUDIO_DEVICE", "default"),
            ("CHIMEWATCH_GAIN", "3"),
            ("CHIMEWATCH_ENABLE_NOTE_DETECTION", "off"),
            ("CHIMEWATCH_SINK_URL", "http://hook"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.audio.device, "default");
        assert_eq!(config.audio.gain, 3.0);
        assert!(!config.detection.enabled);
        assert_eq!(config.sink.url.as_deref(), Some("http://hook"));
    }

    #[test]
    fn env_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "CHIMEWATCH_RMS_THRESHOLD").then(|| "loud".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Env {
                key: "RMS_THRESHOLD".into(),
                value: "loud".into()
            }
        );
    }

    #[test]
    fn addon_options_map_onto_config() {
        let options: AddonOptions = serde_json::from_str(
            r#"{"audio_device": "plughw:0,0", "target_melody": ["E6", "C6"], "sink_topic": "laundry"}"#,
        )
        .unwrap();
        let mut config = Config::default();
        options.apply(&mut config);
        assert_eq!(config.audio.device, "plughw:0,0");
        assert!(config.melody.enabled);
        assert_eq!(config.melody.sequence.len(), 2);
        assert_eq!(config.sink.topic, "laundry");
    }
}
