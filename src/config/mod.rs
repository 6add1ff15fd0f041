//! Immutable screening settings.
//!
//! One [`Settings`] value is read at startup and threaded into each
//! component that needs it. Nothing mutates a `Settings` in place; the only
//! way to change configuration is [`Settings::apply`], which folds a
//! [`SettingsUpdate`] into a new value.

pub mod paths;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::data_dir;

/// How much rationale the analysis model is asked to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningDepth {
    Concise,
    #[default]
    Detailed,
}

/// Top-level settings shape (settings.json in the data directory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub reasoning_depth: ReasoningDepth,
    pub report_language: String,
    /// Allow web-grounded inference calls (search tools, self-training).
    pub enable_internet: bool,
    /// Enable the live audio/video co-pilot feature.
    pub live_analysis: bool,
    /// Persist analysis history locally.
    pub retain_history: bool,
    /// Developer escape hatch: replace the default system instruction.
    /// Ignored unless `prompt_injection` is set.
    pub custom_instruction: Option<String>,
    pub prompt_injection: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reasoning_depth: ReasoningDepth::Detailed,
            report_language: "English".to_string(),
            enable_internet: true,
            live_analysis: true,
            retain_history: true,
            custom_instruction: None,
            prompt_injection: false,
        }
    }
}

/// A partial update; `None` fields leave the current value untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub reasoning_depth: Option<ReasoningDepth>,
    pub report_language: Option<String>,
    pub enable_internet: Option<bool>,
    pub live_analysis: Option<bool>,
    pub retain_history: Option<bool>,
    pub custom_instruction: Option<Option<String>>,
    pub prompt_injection: Option<bool>,
}

impl Settings {
    /// Read settings.json from the data directory, falling back to defaults
    /// when the file is missing or unreadable.
    pub fn load() -> Settings {
        read_json_file(&settings_path()).unwrap_or_default()
    }

    /// Read settings from an explicit path (used by tests and embedders).
    pub fn load_from(path: &Path) -> Settings {
        read_json_file(path).unwrap_or_default()
    }

    /// Fold an update into a new `Settings` value. The receiver is untouched.
    pub fn apply(&self, update: SettingsUpdate) -> Settings {
        let mut next = self.clone();
        if let Some(v) = update.reasoning_depth {
            next.reasoning_depth = v;
        }
        if let Some(v) = update.report_language {
            next.report_language = v;
        }
        if let Some(v) = update.enable_internet {
            next.enable_internet = v;
        }
        if let Some(v) = update.live_analysis {
            next.live_analysis = v;
        }
        if let Some(v) = update.retain_history {
            next.retain_history = v;
        }
        if let Some(v) = update.custom_instruction {
            next.custom_instruction = v;
        }
        if let Some(v) = update.prompt_injection {
            next.prompt_injection = v;
        }
        next
    }

    /// The system-instruction override, if one is active.
    ///
    /// A custom instruction only takes effect while the prompt-injection
    /// developer toggle is on.
    pub fn instruction_override(&self) -> Option<&str> {
        if self.prompt_injection {
            self.custom_instruction.as_deref()
        } else {
            None
        }
    }
}

/// Path to settings.json.
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Generic helper: read a JSON file and deserialize it.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_produces_new_value_and_leaves_original() {
        let base = Settings::default();
        let next = base.apply(SettingsUpdate {
            report_language: Some("Spanish".into()),
            enable_internet: Some(false),
            ..Default::default()
        });
        assert_eq!(base.report_language, "English");
        assert!(base.enable_internet);
        assert_eq!(next.report_language, "Spanish");
        assert!(!next.enable_internet);
        // untouched fields carry over
        assert_eq!(next.reasoning_depth, base.reasoning_depth);
    }

    #[test]
    fn override_requires_prompt_injection() {
        let s = Settings::default().apply(SettingsUpdate {
            custom_instruction: Some(Some("be weird".into())),
            ..Default::default()
        });
        assert_eq!(s.instruction_override(), None);

        let s = s.apply(SettingsUpdate {
            prompt_injection: Some(true),
            ..Default::default()
        });
        assert_eq!(s.instruction_override(), Some("be weird"));
    }
}
