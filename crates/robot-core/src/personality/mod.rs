//! Personalities: a voice, a system prompt and conversation tuning, loaded from JSON.

pub mod voices;

use crate::error::Error;
use crate::realtime_api::VadSensitivity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub use voices::{VOICE_CATALOG, VoiceInfo, get_voice, list_voices};

/// Personality used when the configured one is missing.
pub const FALLBACK_PERSONALITY: &str = "friendly";

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Personality {
    pub name: String,
    /// Canonical catalog name of the voice.
    pub voice: String,
    pub system_prompt: String,
    pub description: String,
    pub conversation_timeout: Duration,
    pub vad_sensitivity: VadSensitivity,
}

#[derive(Deserialize)]
struct PersonalityFile {
    name: String,
    voice: String,
    system_prompt: String,
    #[serde(default)]
    description: String,
    conversation_timeout_seconds: Option<u64>,
    vad_sensitivity: Option<String>,
}

impl Personality {
    /// Parses and validates one personality definition.
    pub fn from_json(json: &str, source_name: &str) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidPersonality {
            source_name: source_name.to_string(),
            reason,
        };

        let file: PersonalityFile =
            serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        let voice = get_voice(&file.voice)
            .map_err(|e| invalid(format!("uses unknown voice: {e}")))?;
        let vad_sensitivity = match file.vad_sensitivity {
            Some(raw) => raw.parse::<VadSensitivity>().map_err(invalid)?,
            None => VadSensitivity::default(),
        };

        Ok(Self {
            name: file.name,
            voice: voice.name.to_string(),
            system_prompt: file.system_prompt,
            description: file.description,
            conversation_timeout: Duration::from_secs(
                file.conversation_timeout_seconds
                    .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            ),
            vad_sensitivity,
        })
    }
}

/// Personalities keyed by lower-cased file stem.
#[derive(Debug, Clone, Default)]
pub struct PersonalityManager {
    personalities: BTreeMap<String, Personality>,
}

impl PersonalityManager {
    /// Loads every `*.json` file in `dir`. Invalid files are logged and skipped;
    /// a missing directory yields an empty manager.
    pub fn load(dir: &Path) -> Self {
        let mut manager = Self::default();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Personalities directory {} unavailable: {}", dir.display(), e);
                return manager;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let loaded = std::fs::read_to_string(&path)
                .map_err(|e| Error::InvalidPersonality {
                    source_name: path.display().to_string(),
                    reason: e.to_string(),
                })
                .and_then(|json| Personality::from_json(&json, &path.display().to_string()));
            match loaded {
                Ok(personality) => {
                    tracing::debug!("Loaded personality '{}' from {}", stem, path.display());
                    manager.insert(stem, personality);
                }
                Err(e) => tracing::warn!("Skipping invalid personality file: {}", e),
            }
        }
        tracing::info!("Loaded {} personalities", manager.personalities.len());
        manager
    }

    pub fn insert(&mut self, key: &str, personality: Personality) {
        self.personalities.insert(key.to_lowercase(), personality);
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Result<&Personality, Error> {
        self.personalities
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::UnknownPersonality {
                name: name.to_string(),
                available: self.list().join(", "),
            })
    }

    pub fn default_personality(&self) -> Result<&Personality, Error> {
        self.get(FALLBACK_PERSONALITY)
    }

    /// Sorted personality keys.
    pub fn list(&self) -> Vec<String> {
        self.personalities.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.personalities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PROFESSIONAL: &str = r#"{
        "name": "Professional",
        "voice": "kore",
        "system_prompt": "Be concise.",
        "vad_sensitivity": "high"
    }"#;

    #[test]
    fn parses_with_defaults() {
        let p = Personality::from_json(PROFESSIONAL, "professional.json").unwrap();
        assert_eq!(p.voice, "Kore");
        assert_eq!(p.description, "");
        assert_eq!(p.conversation_timeout, Duration::from_secs(30));
        assert_eq!(p.vad_sensitivity, VadSensitivity::High);
    }

    #[test]
    fn rejects_missing_field_unknown_voice_and_bad_vad() {
        assert!(Personality::from_json(r#"{"name":"x","voice":"Kore"}"#, "a").is_err());
        assert!(
            Personality::from_json(
                r#"{"name":"x","voice":"Robotron","system_prompt":"p"}"#,
                "b"
            )
            .is_err()
        );
        let err = Personality::from_json(
            r#"{"name":"x","voice":"Kore","system_prompt":"p","vad_sensitivity":"LOUD"}"#,
            "c",
        )
        .unwrap_err();
        assert!(err.to_string().contains("vad_sensitivity"));
    }

    #[test]
    fn loads_directory_and_skips_invalid_files() {
        // --- Arrange ---
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Professional.json"), PROFESSIONAL).unwrap();
        fs::write(
            dir.path().join("friendly.json"),
            r#"{"name":"Friendly","voice":"Achird","system_prompt":"Be warm.","conversation_timeout_seconds":45}"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        // --- Act ---
        let manager = PersonalityManager::load(dir.path());

        // --- Assert ---
        assert_eq!(manager.list(), vec!["friendly", "professional"]);
        assert_eq!(manager.get("PROFESSIONAL").unwrap().voice, "Kore");
        let friendly = manager.default_personality().unwrap();
        assert_eq!(friendly.conversation_timeout, Duration::from_secs(45));
    }

    #[test]
    fn missing_directory_yields_empty_manager() {
        let manager = PersonalityManager::load(Path::new("/definitely/not/here"));
        assert!(manager.is_empty());
        assert!(matches!(
            manager.get("friendly"),
            Err(Error::UnknownPersonality { .. })
        ));
    }
}
