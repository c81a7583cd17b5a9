use crate::audio::DEFAULT_SAMPLE_RATE;
use crate::error::{ClientError, Result};
use crate::language::{self, DEFAULT_DOCTOR_LANGUAGE, DEFAULT_PATIENT_LANGUAGE};
use crate::model::{LanguagePair, Role};
use crate::playback::{AUTOPLAY_VOLUME, SPEECH_RATE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const API_URL_ENV: &str = "MEDITRANSLATE_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_doctor_language")]
    pub doctor_language: String,
    #[serde(default = "default_patient_language")]
    pub patient_language: String,
    #[serde(default = "default_true")]
    pub auto_speak: bool,
    /// Input device name; empty selects the system default.
    #[serde(default)]
    pub mic_device: String,
    /// Local synthesizer invoked as `<cmd> -v <voice> -s <wpm> <text>`.
    /// Empty disables local speech.
    #[serde(default = "default_speech_command")]
    pub speech_command: String,
    #[serde(default = "default_speech_rate")]
    pub speech_rate: f32,
    #[serde(default = "default_autoplay_volume")]
    pub autoplay_volume: f32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Settings {
    pub fn languages(&self) -> LanguagePair {
        LanguagePair::new(self.doctor_language.clone(), self.patient_language.clone())
    }

    pub fn set_languages(&mut self, languages: &LanguagePair) {
        self.doctor_language = languages.doctor.clone();
        self.patient_language = languages.patient.clone();
    }

    /// Replace unsupported codes and out-of-range numbers with defaults.
    fn sanitize(&mut self) {
        if !language::is_supported(&self.doctor_language) {
            log::warn!(
                "[settings] unsupported doctor language '{}', using default",
                self.doctor_language
            );
            self.doctor_language = default_doctor_language();
        }
        if !language::is_supported(&self.patient_language) {
            log::warn!(
                "[settings] unsupported patient language '{}', using default",
                self.patient_language
            );
            self.patient_language = default_patient_language();
        }
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        if self.api_base_url.is_empty() {
            self.api_base_url = default_api_base_url();
        }
        if !(0.1..=4.0).contains(&self.speech_rate) {
            self.speech_rate = default_speech_rate();
        }
        self.autoplay_volume = self.autoplay_volume.clamp(0.0, 1.0);
        if self.sample_rate == 0 {
            self.sample_rate = default_sample_rate();
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            role: default_role(),
            doctor_language: default_doctor_language(),
            patient_language: default_patient_language(),
            auto_speak: true,
            mic_device: String::new(),
            speech_command: default_speech_command(),
            speech_rate: default_speech_rate(),
            autoplay_volume: default_autoplay_volume(),
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000".into()
}
fn default_role() -> Role {
    Role::Doctor
}
fn default_doctor_language() -> String {
    DEFAULT_DOCTOR_LANGUAGE.into()
}
fn default_patient_language() -> String {
    DEFAULT_PATIENT_LANGUAGE.into()
}
fn default_true() -> bool {
    true
}
fn default_speech_command() -> String {
    "espeak-ng".into()
}
fn default_speech_rate() -> f32 {
    SPEECH_RATE
}
fn default_autoplay_volume() -> f32 {
    AUTOPLAY_VOLUME
}
fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

pub fn settings_path() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_local_dir() {
        return Ok(dir.join("MediTranslate").join("settings.json"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".meditranslate").join("settings.json"));
    }
    Err(ClientError::Config("failed to resolve data directory".into()))
}

pub fn load() -> Settings {
    let mut settings = match settings_path() {
        Ok(path) => load_from(&path),
        Err(_) => Settings::default(),
    };
    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            settings.api_base_url = url;
        }
    }
    settings.sanitize();
    settings
}

pub fn load_from(path: &Path) -> Settings {
    let mut settings: Settings = match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            log::warn!("[settings] ignoring unreadable {}: {}", path.display(), e);
            Settings::default()
        }),
        Err(_) => return Settings::default(),
    };
    settings.sanitize();
    settings
}

pub fn save(settings: &Settings) -> Result<()> {
    save_to(&settings_path()?, settings)
}

pub fn save_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ClientError::Config(format!("failed to create settings dir: {}", e)))?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| ClientError::Config(format!("failed to serialize settings: {}", e)))?;
    fs::write(path, json)
        .map_err(|e| ClientError::Config(format!("failed to write settings: {}", e)))?;
    Ok(())
}
