use crate::errors::{AutomationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub selectors: SelectorConfig,
    pub retry: RetryConfig,
    pub portal: PortalConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub args: Vec<String>,
    /// Chrome is shut down after this long without protocol traffic.
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Budget for every candidate after the first one.
    pub fallback_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Where drift statistics are persisted. `None` keeps them in memory.
    pub drift_stats_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub click_max_attempts: u32,
    pub base_delay_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_ms: u64,
    /// HEAL classifications tolerated in a row before the run is marked as errored.
    pub max_consecutive_heals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub url: String,
    /// Regex matched against the current URL while the login flow is showing.
    pub login_url_pattern: String,
    /// Substring of the landing URL some account types are redirected to after login.
    pub post_login_url_substring: String,
    pub search_url_pattern: String,
    pub case_detail_url_pattern: String,
    pub login_verify_timeout_ms: u64,
    pub landmark_timeout_ms: u64,
    pub state_cache_ttl_ms: u64,
    pub dom_stable_matches: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub filter: String,
    /// Lines buffered for the file writer thread before new lines are dropped.
    pub buffered_lines_limit: usize,
}

impl Config {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.click_max_attempts == 0 {
            return Err(AutomationError::Configuration(
                "retry.click_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.breaker_failure_threshold == 0 {
            return Err(AutomationError::Configuration(
                "retry.breaker_failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.portal.dom_stable_matches < 2 {
            return Err(AutomationError::Configuration(
                "portal.dom_stable_matches must be at least 2".to_string(),
            ));
        }
        for (name, pattern) in [
            ("login_url_pattern", &self.portal.login_url_pattern),
            ("search_url_pattern", &self.portal.search_url_pattern),
            ("case_detail_url_pattern", &self.portal.case_detail_url_pattern),
        ] {
            regex::Regex::new(pattern).map_err(|e| {
                AutomationError::Configuration(format!("portal.{}: {}", name, e))
            })?;
        }
        url::Url::parse(&self.portal.url)
            .map_err(|e| AutomationError::Configuration(format!("portal.url: {}", e)))?;
        Ok(())
    }
}

impl SelectorConfig {
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }
}

impl PortalConfig {
    pub fn login_verify_timeout(&self) -> Duration {
        Duration::from_millis(self.login_verify_timeout_ms)
    }

    pub fn landmark_timeout(&self) -> Duration {
        Duration::from_millis(self.landmark_timeout_ms)
    }

    pub fn state_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.state_cache_ttl_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            viewport: Viewport::default(),
            user_agent: None,
            args: vec![],
            idle_timeout_ms: 600000,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            fallback_timeout_ms: 1000,
            poll_interval_ms: 200,
            drift_stats_path: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            click_max_attempts: 3,
            base_delay_ms: 500,
            breaker_failure_threshold: 5,
            breaker_cooldown_ms: 30000,
            max_consecutive_heals: 3,
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: "https://www.sigges.cl".to_string(),
            login_url_pattern: r"(?i)/(login|acceso)".to_string(),
            post_login_url_substring: "/#/actualizaciones".to_string(),
            search_url_pattern: r"(?i)busqueda".to_string(),
            case_detail_url_pattern: r"(?i)cartola".to_string(),
            login_verify_timeout_ms: 10000,
            landmark_timeout_ms: 3000,
            state_cache_ttl_ms: 5000,
            dom_stable_matches: 2,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "sigges-pilot.log".to_string(),
            filter: "info".to_string(),
            buffered_lines_limit: 10000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.retry.click_max_attempts, 3);
        assert_eq!(config.portal.login_verify_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "retry": { "click_max_attempts": 5 } }"#).unwrap();
        assert_eq!(config.retry.click_max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.selectors.fallback_timeout_ms, 1000);
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let mut config = Config::default();
        config.portal.login_url_pattern = "(unclosed".to_string();
        assert!(matches!(
            config.validate(),
            Err(AutomationError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config.portal.dom_stable_matches, 2);
    }
}
