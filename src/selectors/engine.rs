use super::catalog::LocatorSet;
use super::drift::DriftStats;
use crate::core::config::SelectorConfig;
use crate::core::BrowserTrait;
use crate::errors::{AutomationError, Result};
use crate::types::ElementCondition;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// An element together with the fallback position that produced it.
#[derive(Debug, Clone)]
pub struct Resolved<E> {
    pub element: E,
    pub index: usize,
    pub locator: String,
}

/// Resolves locator sets against the page, primary first.
///
/// The primary locator gets the caller's full timeout; fallbacks only get
/// the short `fallback_timeout`. Which position won is recorded in the drift
/// statistics and persisted straight away.
pub struct SelectorEngine {
    fallback_timeout: Duration,
    poll_interval: Duration,
    drift: Mutex<DriftStats>,
}

impl SelectorEngine {
    pub fn new(config: &SelectorConfig, drift: DriftStats) -> Self {
        Self {
            fallback_timeout: config.fallback_timeout(),
            poll_interval: config.poll_interval(),
            drift: Mutex::new(drift),
        }
    }

    /// Engine configured from `config`, loading drift statistics from the
    /// configured path. An unusable statistics file degrades to in-memory.
    pub fn from_config(config: &SelectorConfig) -> Self {
        let drift = match &config.drift_stats_path {
            Some(path) => DriftStats::open(path).unwrap_or_else(|e| {
                error!("Cannot open drift statistics {:?}: {}", path, e);
                DriftStats::in_memory()
            }),
            None => DriftStats::in_memory(),
        };
        Self::new(config, drift)
    }

    pub fn drifting_keys(&self) -> Vec<String> {
        self.drift
            .lock()
            .drifting_keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn drift_hits(&self, key: &str) -> Option<[u64; super::drift::TRACKED_POSITIONS]> {
        self.drift.lock().entry(key).map(|entry| entry.hits)
    }

    /// `Ok(None)` when no candidate resolves in time. `Err` only when the
    /// browser session itself is gone.
    pub async fn resolve<B: BrowserTrait>(
        &self,
        browser: &B,
        set: &LocatorSet,
        condition: ElementCondition,
        timeout: Duration,
    ) -> Result<Option<Resolved<B::Element>>> {
        self.resolve_within(browser, set, condition, timeout, self.fallback_timeout)
            .await
    }

    /// Like [`resolve`](Self::resolve), but fallbacks are checked once
    /// instead of polled. For presence checks where absence is the common
    /// answer.
    pub async fn probe<B: BrowserTrait>(
        &self,
        browser: &B,
        set: &LocatorSet,
        condition: ElementCondition,
        timeout: Duration,
    ) -> Result<Option<Resolved<B::Element>>> {
        self.resolve_within(browser, set, condition, timeout, Duration::ZERO)
            .await
    }

    async fn resolve_within<B: BrowserTrait>(
        &self,
        browser: &B,
        set: &LocatorSet,
        condition: ElementCondition,
        timeout: Duration,
        fallback_timeout: Duration,
    ) -> Result<Option<Resolved<B::Element>>> {
        for (index, locator) in set.candidates().iter().enumerate() {
            let budget = if index == 0 { timeout } else { fallback_timeout };

            match self.poll(browser, locator, condition, budget).await {
                Ok(Some(element)) => {
                    self.record_hit(set.key(), index, locator);
                    return Ok(Some(Resolved {
                        element,
                        index,
                        locator: locator.clone(),
                    }));
                }
                Ok(None) => {
                    debug!(
                        key = set.key(),
                        index,
                        condition = %condition,
                        budget_ms = budget.as_millis() as u64,
                        "Candidate did not resolve"
                    );
                }
                Err(AutomationError::InvalidSelector(reason)) => {
                    error!(
                        key = set.key(),
                        index,
                        locator = %locator,
                        "Malformed locator skipped: {}",
                        reason
                    );
                }
                Err(e) => return Err(e),
            }
        }

        debug!(key = set.key(), condition = %condition, "No candidate resolved");
        Ok(None)
    }

    /// Probe one locator until it satisfies `condition` or `budget` runs out.
    /// Transient probe errors keep the poll going.
    async fn poll<B: BrowserTrait>(
        &self,
        browser: &B,
        locator: &str,
        condition: ElementCondition,
        budget: Duration,
    ) -> Result<Option<B::Element>> {
        let deadline = Instant::now() + budget;
        loop {
            match browser.find_element(locator, condition).await {
                Ok(Some(element)) => return Ok(Some(element)),
                Ok(None) => {}
                Err(e @ AutomationError::SessionLost(_))
                | Err(e @ AutomationError::InvalidSelector(_)) => return Err(e),
                Err(e) => debug!(locator, "Transient probe error: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    fn record_hit(&self, key: &str, index: usize, locator: &str) {
        let mut drift = self.drift.lock();
        let outcome = drift.record(key, index);

        if outcome.fallback_used {
            warn!(
                key,
                index,
                locator,
                "Resolved through fallback locator, primary may be outdated"
            );
        }
        if outcome.crossed_over {
            warn!(
                key,
                position = outcome.position,
                "Selector drift: a fallback now wins more often than the primary locator"
            );
        }

        if let Err(e) = drift.save() {
            warn!(key, "Could not persist drift statistics: {}", e);
        }
    }
}
