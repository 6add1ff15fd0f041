//! Local persisted state: screening history, onboarding flag.
//!
//! Everything lives as JSON files under the platform data directory.
//! Writes go through a temp file and rename so a crash never leaves a
//! half-written store; reads degrade to empty/default values with a log,
//! never an error to the caller. Only the UI thread touches these files —
//! single writer, no concurrent modification.

pub mod training;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::analysis::types::{HistoryItem, ScreeningInput, ScreeningReport};
use crate::config::paths::data_dir;
use crate::error::Result;

/// Retained analyses are capped at this many, newest first.
pub const MAX_HISTORY: usize = 20;

/// Capped, most-recent-first list of retained analyses.
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Store under the default data directory.
    pub fn open() -> Self {
        Self::at(data_dir().join("history.json"))
    }

    /// Store at an explicit path (tests, embedders).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all retained items, newest first. Missing or corrupt files
    /// read as empty.
    pub fn load(&self) -> Vec<HistoryItem> {
        crate::config::read_json_file(&self.path).unwrap_or_default()
    }

    /// Retain one request/result pair. Inserts at the front, trims to
    /// [`MAX_HISTORY`], and strips inline media payloads (they do not
    /// survive persistence; names and MIME types do). Returns the stored
    /// item.
    pub fn save(&self, input: &ScreeningInput, output: &ScreeningReport) -> Result<HistoryItem> {
        let mut safe_input = input.clone();
        for file in &mut safe_input.media_files {
            file.data = String::new();
        }
        if let Some(note) = &mut safe_input.voice_note {
            note.data = String::new();
        }

        let item = HistoryItem {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            input: safe_input,
            output: output.clone(),
        };

        let mut history = self.load();
        history.insert(0, item.clone());
        history.truncate(MAX_HISTORY);
        self.write(&history)?;

        info!(id = %item.id, retained = history.len(), "Saved analysis to history");
        Ok(item)
    }

    /// Remove one item by id. Returns the remaining items.
    pub fn delete(&self, id: &str) -> Result<Vec<HistoryItem>> {
        let mut history = self.load();
        history.retain(|item| item.id != id);
        self.write(&history)?;
        Ok(history)
    }

    /// Drop everything.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write(&self, history: &[HistoryItem]) -> Result<()> {
        let json = serde_json::to_string(history)
            .map_err(|e| crate::error::Error::Parse(e.to_string()))?;
        write_atomic(&self.path, &json)
    }
}

/// Whether the user has completed the onboarding tutorial.
pub fn onboarding_complete(dir: &Path) -> bool {
    dir.join("onboarding_complete").exists()
}

/// Mark onboarding as done.
pub fn set_onboarding_complete(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("onboarding_complete"), b"true")?;
    Ok(())
}

/// Write via a temp file in the same directory, then rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".store.{}.tmp", uuid::Uuid::new_v4()));
    if let Err(e) = std::fs::write(&tmp, contents) {
        warn!("Store write failed: {e}");
        return Err(e.into());
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{AgeUnit, AudioFeatures, MediaFile, Patient};

    fn temp_store(name: &str) -> HistoryStore {
        let path = std::env::temp_dir()
            .join("phenograph-tests")
            .join(format!("{}-{}.json", name, uuid::Uuid::new_v4()));
        HistoryStore::at(path)
    }

    fn sample_input() -> ScreeningInput {
        ScreeningInput {
            patient: Patient {
                age: 7,
                age_unit: AgeUnit::Years,
                sex: "male".into(),
                note: "tremor in both hands".into(),
            },
            hpo_candidates: Vec::new(),
            audio_features: AudioFeatures::default(),
            source_urls: Vec::new(),
            media_files: vec![MediaFile {
                data: "HUGEBASE64PAYLOAD".into(),
                mime_type: "video/webm".into(),
                file_name: Some("clip.webm".into()),
            }],
            voice_note: None,
            report_language: None,
        }
    }

    fn sample_report(patient: &Patient) -> ScreeningReport {
        serde_json::from_value(serde_json::json!({
            "patient": patient,
            "disclaimer": "Not a diagnosis."
        }))
        .unwrap()
    }

    #[test]
    fn cap_evicts_the_oldest_and_inserts_at_front() {
        let store = temp_store("cap");
        let input = sample_input();
        let report = sample_report(&input.patient);

        let mut ids = Vec::new();
        for _ in 0..MAX_HISTORY + 1 {
            ids.push(store.save(&input, &report).unwrap().id);
        }

        let history = store.load();
        assert_eq!(history.len(), MAX_HISTORY);
        // Newest first...
        assert_eq!(history[0].id, *ids.last().unwrap());
        // ...and the very first write has been evicted.
        assert!(history.iter().all(|item| item.id != ids[0]));

        store.clear().unwrap();
    }

    #[test]
    fn media_payloads_are_stripped_but_metadata_survives() {
        let store = temp_store("strip");
        let input = sample_input();
        let report = sample_report(&input.patient);
        store.save(&input, &report).unwrap();

        let stored = &store.load()[0];
        assert_eq!(stored.input.media_files[0].data, "");
        assert_eq!(stored.input.media_files[0].mime_type, "video/webm");
        // The caller's input is untouched.
        assert_eq!(input.media_files[0].data, "HUGEBASE64PAYLOAD");

        store.clear().unwrap();
    }

    #[test]
    fn delete_removes_one_item() {
        let store = temp_store("delete");
        let input = sample_input();
        let report = sample_report(&input.patient);
        let first = store.save(&input, &report).unwrap();
        let second = store.save(&input, &report).unwrap();

        let remaining = store.delete(&first.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);

        store.clear().unwrap();
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let store = temp_store("missing");
        assert!(store.load().is_empty());
    }

    #[test]
    fn onboarding_flag_round_trips() {
        let dir = std::env::temp_dir()
            .join("phenograph-tests")
            .join(format!("onboarding-{}", uuid::Uuid::new_v4()));
        assert!(!onboarding_complete(&dir));
        set_onboarding_complete(&dir).unwrap();
        assert!(onboarding_complete(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
