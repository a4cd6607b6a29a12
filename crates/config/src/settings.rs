// Engine settings
// Loaded from ~/.config/tabflow/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What happens to a commit submitted while time travel is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PausedCommits {
    /// Evaluate at the newest state and append; the visible state stays
    /// frozen until resume.
    #[default]
    Append,
    /// Evaluate at the visible state; later entries are discarded.
    Branch,
    /// Refuse the commit.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Propagation
    #[serde(rename = "propagation.maxRounds")]
    pub max_rounds: usize,

    // History
    #[serde(rename = "history.pausedCommits")]
    pub paused_commits: PausedCommits,

    #[serde(rename = "history.maxEntries")]
    pub max_history_entries: Option<usize>, // None = unbounded

    // Logging
    #[serde(rename = "engine.logReports")]
    pub log_reports: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_rounds: 64,
            paused_commits: PausedCommits::Append,
            max_history_entries: None,
            log_reports: true,
        }
    }
}

/// TOML form, using nested tables instead of dotted keys.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlSettings {
    propagation: TomlPropagation,
    history: TomlHistory,
    engine: TomlEngine,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct TomlPropagation {
    max_rounds: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct TomlHistory {
    paused_commits: Option<PausedCommits>,
    max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct TomlEngine {
    log_reports: Option<bool>,
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tabflow");
        config_dir.join("settings.json")
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load settings from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Error parsing {}: {}; using default settings", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings JSON. Lines starting with `//` are comments.
    pub fn from_json_str(contents: &str) -> Result<Self, String> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        let settings: Self = serde_json::from_str(&cleaned).map_err(|e| e.to_string())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings TOML:
    ///
    /// ```toml
    /// [propagation]
    /// max_rounds = 32
    ///
    /// [history]
    /// paused_commits = "branch"
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self, String> {
        let raw: TomlSettings = toml::from_str(contents).map_err(|e| e.to_string())?;
        let defaults = Self::default();
        let settings = Self {
            max_rounds: raw.propagation.max_rounds.unwrap_or(defaults.max_rounds),
            paused_commits: raw.history.paused_commits.unwrap_or(defaults.paused_commits),
            max_history_entries: raw.history.max_entries,
            log_reports: raw.engine.log_reports.unwrap_or(defaults.log_reports),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_rounds == 0 {
            return Err("propagation.maxRounds must be at least 1".to_string());
        }
        if self.max_history_entries == Some(0) {
            return Err("history.maxEntries must be at least 1".to_string());
        }
        Ok(())
    }

    /// Save current settings to the default location
    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::config_path())
    }

    /// Save current settings to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;

        fs::write(path, json).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.max_rounds, 64);
        assert_eq!(s.paused_commits, PausedCommits::Append);
        assert_eq!(s.max_history_entries, None);
        assert!(s.log_reports);
    }

    #[test]
    fn test_json_with_comments_and_partial_keys() {
        let json = r#"{
    // Propagation
    "propagation.maxRounds": 8,
    "history.pausedCommits": "reject"
}"#;
        let s = Settings::from_json_str(json).unwrap();
        assert_eq!(s.max_rounds, 8);
        assert_eq!(s.paused_commits, PausedCommits::Reject);
        assert_eq!(s.max_history_entries, None);
    }

    #[test]
    fn test_json_rejects_zero_rounds() {
        assert!(Settings::from_json_str(r#"{"propagation.maxRounds": 0}"#).is_err());
    }

    #[test]
    fn test_toml() {
        let s = Settings::from_toml_str(
            "[propagation]\nmax_rounds = 12\n\n[history]\npaused_commits = \"branch\"\nmax_entries = 50\n",
        )
        .unwrap();
        assert_eq!(s.max_rounds, 12);
        assert_eq!(s.paused_commits, PausedCommits::Branch);
        assert_eq!(s.max_history_entries, Some(50));
        assert!(s.log_reports);
    }

    #[test]
    fn test_toml_empty_is_default() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let s = Settings {
            max_rounds: 5,
            paused_commits: PausedCommits::Branch,
            max_history_entries: Some(10),
            log_reports: false,
        };
        s.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), s);
    }

    #[test]
    fn test_load_missing_or_malformed_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert_eq!(Settings::load_from(&missing), Settings::default());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&bad), Settings::default());
    }
}
