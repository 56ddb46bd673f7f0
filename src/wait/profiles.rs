use crate::errors::{AutomationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Timing profile looked up by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitProfile {
    /// Spinner expression, for profiles that describe a loading indicator.
    #[serde(default)]
    pub xpath: Option<String>,
    /// Main wait, in seconds.
    pub wait: f64,
    /// Settle delay after the wait succeeded, in seconds.
    #[serde(default)]
    pub sleep: f64,
}

impl WaitProfile {
    pub fn new(wait: f64, sleep: f64) -> Self {
        Self {
            xpath: None,
            wait,
            sleep,
        }
    }

    pub fn spinner(xpath: impl Into<String>, wait: f64, sleep: f64) -> Self {
        Self {
            xpath: Some(xpath.into()),
            wait,
            sleep,
        }
    }

    pub fn wait_duration(&self) -> Duration {
        secs(self.wait)
    }

    pub fn sleep_duration(&self) -> Duration {
        secs(self.sleep)
    }
}

/// Upper bound for any profile duration, in seconds.
const MAX_PROFILE_SECS: f64 = 3600.0;

fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value.min(MAX_PROFILE_SECS))
}

/// Name → profile table. Unknown names fall back to `default`.
#[derive(Debug, Clone)]
pub struct WaitProfiles {
    profiles: HashMap<String, WaitProfile>,
}

pub const DEFAULT_PROFILE: &str = "default";

impl WaitProfiles {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let parsed: HashMap<String, WaitProfile> = serde_json::from_str(json)?;
        let mut profiles = Self::default();
        profiles.profiles.extend(parsed);
        Ok(profiles)
    }

    /// Load a profile file on top of the built-in table.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::Configuration(format!("wait profiles {:?}: {}", path, e))
        })?;
        let profiles = Self::from_json_str(&content)?;
        info!("Loaded wait profiles from {:?}", path);
        Ok(profiles)
    }

    pub fn insert(&mut self, name: impl Into<String>, profile: WaitProfile) {
        self.profiles.insert(name.into(), profile);
    }

    /// Exact lookup.
    pub fn get(&self, name: &str) -> Option<&WaitProfile> {
        self.profiles.get(name)
    }

    /// Lookup with fallback to the default profile.
    pub fn resolve(&self, name: &str) -> WaitProfile {
        match self.profiles.get(name) {
            Some(profile) => profile.clone(),
            None => {
                warn!(profile = name, "Unknown wait profile, using default");
                self.profiles
                    .get(DEFAULT_PROFILE)
                    .cloned()
                    .unwrap_or_else(|| WaitProfile::new(10.0, 0.0))
            }
        }
    }
}

impl Default for WaitProfiles {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), WaitProfile::new(10.0, 0.0));
        profiles.insert("instant".to_string(), WaitProfile::new(0.5, 0.0));
        profiles.insert("fast".to_string(), WaitProfile::new(3.0, 0.0));
        profiles.insert("slow".to_string(), WaitProfile::new(20.0, 0.5));
        profiles.insert(
            "spinner".to_string(),
            WaitProfile::spinner("//dialog[contains(@class,'loading')]", 15.0, 0.3),
        );
        profiles.insert(
            "spinner_long".to_string(),
            WaitProfile::spinner("//dialog[contains(@class,'loading')]", 60.0, 1.0),
        );
        Self { profiles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_overrides_builtins() {
        let profiles = WaitProfiles::from_json_str(
            r#"{ "spinner": { "xpath": "//div[@class='spin']", "wait": 5, "sleep": 0.25 },
                 "report": { "wait": 45 } }"#,
        )
        .unwrap();

        let spinner = profiles.get("spinner").unwrap();
        assert_eq!(spinner.xpath.as_deref(), Some("//div[@class='spin']"));
        assert_eq!(spinner.wait_duration(), Duration::from_secs(5));
        assert_eq!(spinner.sleep_duration(), Duration::from_millis(250));

        let report = profiles.get("report").unwrap();
        assert_eq!(report.sleep_duration(), Duration::ZERO);
        assert!(profiles.get("fast").is_some());
    }

    #[test]
    fn test_unknown_profile_falls_back_to_default() {
        let profiles = WaitProfiles::default();
        assert_eq!(profiles.resolve("nope"), WaitProfile::new(10.0, 0.0));
    }

    #[test]
    fn test_negative_durations_clamp_to_zero() {
        assert_eq!(WaitProfile::new(-1.0, f64::NAN).wait_duration(), Duration::ZERO);
    }

    #[test]
    fn test_oversized_durations_are_capped() {
        let cap = Duration::from_secs(3600);
        let profile = WaitProfile::new(1e300, f64::INFINITY);
        assert_eq!(profile.wait_duration(), cap);
        assert_eq!(profile.sleep_duration(), cap);

        let profiles = WaitProfiles::from_json_str(r#"{"huge":{"wait":1e300}}"#).unwrap();
        assert_eq!(profiles.resolve("huge").wait_duration(), cap);
    }
}
