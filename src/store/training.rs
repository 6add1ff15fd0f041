//! Self-training knowledge state with quota cooldown.
//!
//! Once a day (while internet features are enabled) the app asks the
//! inference service for verified medical updates and folds the summaries
//! into future analysis instructions. Rate-limit failures are recorded
//! with a timestamp and suppress further attempts for an hour, quietly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::client::InferenceClient;
use crate::config::paths::data_dir;
use crate::error::{Error, Result};

/// Minimum interval between successful training runs (24 h).
pub const DAILY_INTERVAL_MS: i64 = 86_400_000;

/// Back-off after a quota failure (1 h).
pub const QUOTA_COOLDOWN_MS: i64 = 3_600_000;

/// How many knowledge summaries to keep, newest first.
pub const MAX_KNOWLEDGE: usize = 6;

/// Accumulated self-training state. Immutable in the reducer style: the
/// record methods return a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Timestamp (ms) of the last successful run; 0 = never.
    #[serde(default)]
    pub last_update_ms: i64,
    /// Verified knowledge summaries, newest first.
    #[serde(default)]
    pub learned: Vec<String>,
    /// Timestamp (ms) of the last quota failure, if within memory.
    #[serde(default)]
    pub last_quota_failure_ms: Option<i64>,
}

impl TrainingState {
    /// Whether a training run is due at `now_ms`: outside the quota
    /// cooldown and more than a day since the last success.
    pub fn should_run(&self, now_ms: i64) -> bool {
        if let Some(failed) = self.last_quota_failure_ms {
            if now_ms - failed < QUOTA_COOLDOWN_MS {
                return false;
            }
        }
        now_ms - self.last_update_ms > DAILY_INTERVAL_MS
    }

    /// Fold in a successful run: front-insert the summary, trim, clear any
    /// quota marker.
    pub fn record_success(&self, now_ms: i64, knowledge: String) -> TrainingState {
        let mut learned = Vec::with_capacity(MAX_KNOWLEDGE);
        learned.push(knowledge);
        learned.extend(self.learned.iter().take(MAX_KNOWLEDGE - 1).cloned());
        TrainingState {
            last_update_ms: now_ms,
            learned,
            last_quota_failure_ms: None,
        }
    }

    /// Remember a quota failure so retries stay suppressed for a while.
    pub fn record_quota_failure(&self, now_ms: i64) -> TrainingState {
        TrainingState {
            last_quota_failure_ms: Some(now_ms),
            ..self.clone()
        }
    }
}

/// File-backed store for [`TrainingState`].
pub struct TrainingStore {
    path: PathBuf,
}

impl TrainingStore {
    pub fn open() -> Self {
        Self::at(data_dir().join("training.json"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> TrainingState {
        crate::config::read_json_file(&self.path).unwrap_or_default()
    }

    pub fn save(&self, state: &TrainingState) -> Result<()> {
        let json = serde_json::to_string(state).map_err(|e| Error::Parse(e.to_string()))?;
        super::write_atomic(&self.path, &json)
    }
}

/// Run the daily sweep if it is due. Returns the new knowledge summary
/// when a run happened and produced one.
///
/// Quota failures are recorded and logged quietly (they are expected on
/// free tiers); other errors propagate.
pub async fn maybe_run_self_training(
    client: &InferenceClient,
    store: &TrainingStore,
    now_ms: i64,
) -> Result<Option<String>> {
    let state = store.load();
    if !state.should_run(now_ms) {
        return Ok(None);
    }

    info!("Running daily self-training sweep");
    match crate::analysis::run_self_training(client).await {
        Ok(knowledge) if !knowledge.is_empty() => {
            store.save(&state.record_success(now_ms, knowledge.clone()))?;
            Ok(Some(knowledge))
        }
        Ok(_) => Ok(None),
        Err(Error::QuotaExceeded) => {
            warn!("Self-training paused (quota exceeded); will retry after cooldown");
            store.save(&state.record_quota_failure(now_ms))?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gates_on_daily_interval_and_cooldown() {
        let fresh = TrainingState::default();
        assert!(fresh.should_run(DAILY_INTERVAL_MS + 1));

        let ran = fresh.record_success(1_000_000, "K1".into());
        assert!(!ran.should_run(1_000_000 + DAILY_INTERVAL_MS));
        assert!(ran.should_run(1_000_001 + DAILY_INTERVAL_MS));

        let failed = ran.record_quota_failure(2_000_000_000);
        assert!(!failed.should_run(2_000_000_000 + QUOTA_COOLDOWN_MS - 1));
        assert!(failed.should_run(2_000_000_000 + DAILY_INTERVAL_MS));
    }

    #[test]
    fn success_clears_the_quota_marker_and_caps_knowledge() {
        let mut state = TrainingState::default().record_quota_failure(5);
        for i in 0..MAX_KNOWLEDGE + 2 {
            state = state.record_success(10 + i as i64, format!("K{i}"));
        }
        assert_eq!(state.learned.len(), MAX_KNOWLEDGE);
        assert_eq!(state.learned[0], format!("K{}", MAX_KNOWLEDGE + 1));
        assert_eq!(state.last_quota_failure_ms, None);
    }

    #[test]
    fn reducer_leaves_the_original_untouched() {
        let base = TrainingState::default();
        let _next = base.record_success(42, "K".into());
        assert_eq!(base, TrainingState::default());
    }
}
