use crate::errors::{AutomationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fallback ordinals tracked per key. Later positions share the last slot.
pub const TRACKED_POSITIONS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftEntry {
    pub hits: [u64; TRACKED_POSITIONS],
}

impl DriftEntry {
    /// A fallback position out-scores the primary locator.
    pub fn is_drifting(&self) -> bool {
        self.hits[1..].iter().any(|&h| h > self.hits[0])
    }
}

/// What a single recorded hit meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftOutcome {
    /// Slot that was incremented.
    pub position: usize,
    pub fallback_used: bool,
    /// This hit made a fallback overtake the primary.
    pub crossed_over: bool,
}

/// Per-key success counts by fallback position, persisted as JSON:
/// `{ "KEY": { "hits": [a, b, c, d, e] } }`.
#[derive(Debug, Default)]
pub struct DriftStats {
    path: Option<PathBuf>,
    entries: BTreeMap<String, DriftEntry>,
}

impl DriftStats {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read the statistics file, creating it when absent. A corrupt file is
    /// logged and replaced by empty statistics rather than stopping the run.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, DriftEntry>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Drift statistics {:?} unreadable ({}), starting fresh", path, e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        let stats = Self {
            path: Some(path),
            entries,
        };
        if !stats.path().map(Path::exists).unwrap_or(true) {
            stats.save()?;
        }
        Ok(stats)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entry(&self, key: &str) -> Option<&DriftEntry> {
        self.entries.get(key)
    }

    pub fn record(&mut self, key: &str, index: usize) -> DriftOutcome {
        let position = index.min(TRACKED_POSITIONS - 1);
        let entry = self.entries.entry(key.to_string()).or_default();
        let was_drifting = entry.is_drifting();
        entry.hits[position] += 1;
        let crossed_over = !was_drifting && entry.is_drifting();

        DriftOutcome {
            position,
            fallback_used: index > 0,
            crossed_over,
        }
    }

    /// Keys whose fallbacks currently beat their primary locator.
    pub fn drifting_keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_drifting())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Overwrite the statistics file. No-op for in-memory statistics.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AutomationError::DriftPersistence(e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| AutomationError::DriftPersistence(e.to_string()))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| AutomationError::DriftPersistence(e.to_string()))?;
        debug!("Drift statistics saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_hits_are_not_fallbacks() {
        let mut stats = DriftStats::in_memory();
        let outcome = stats.record("LOGIN", 0);
        assert!(!outcome.fallback_used);
        assert!(!outcome.crossed_over);
        assert_eq!(stats.entry("LOGIN").unwrap().hits, [1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_crossover_reported_once() {
        let mut stats = DriftStats::in_memory();
        stats.record("MENU", 0);
        stats.record("MENU", 0);

        assert!(!stats.record("MENU", 2).crossed_over);
        assert!(!stats.record("MENU", 2).crossed_over);
        let third = stats.record("MENU", 2);
        assert!(third.fallback_used);
        assert!(third.crossed_over);
        assert!(!stats.record("MENU", 2).crossed_over);

        assert_eq!(stats.drifting_keys(), vec!["MENU"]);
    }

    #[test]
    fn test_first_ever_fallback_hit_crosses_over() {
        let mut stats = DriftStats::in_memory();
        let outcome = stats.record("SEARCH", 1);
        assert!(outcome.crossed_over);
        assert_eq!(stats.entry("SEARCH").unwrap().hits, [0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_positions_beyond_tracking_share_last_slot() {
        let mut stats = DriftStats::in_memory();
        let outcome = stats.record("DEEP", 7);
        assert_eq!(outcome.position, TRACKED_POSITIONS - 1);
        assert_eq!(stats.entry("DEEP").unwrap().hits, [0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.json");

        let mut stats = DriftStats::open(&path).unwrap();
        assert!(path.exists());
        stats.record("BUTTON", 1);
        stats.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["BUTTON"]["hits"], serde_json::json!([0, 1, 0, 0, 0]));

        let reloaded = DriftStats::open(&path).unwrap();
        assert_eq!(reloaded.entry("BUTTON").unwrap().hits, [0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.json");
        std::fs::write(&path, "{ not json").unwrap();

        let stats = DriftStats::open(&path).unwrap();
        assert!(stats.entry("ANY").is_none());
    }
}
