use super::profiles::WaitProfiles;
use crate::core::BrowserTrait;
use crate::types::ElementCondition;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Condition-polling waits that replace fixed sleeps.
///
/// Nothing in here returns an error: a spinner that never shows up or never
/// goes away is logged and the caller carries on.
pub struct SmartWait {
    profiles: WaitProfiles,
    poll_interval: Duration,
    stable_matches: u32,
}

impl SmartWait {
    pub fn new(profiles: WaitProfiles, poll_interval: Duration, stable_matches: u32) -> Self {
        Self {
            profiles,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            stable_matches: stable_matches.max(2),
        }
    }

    pub fn profiles(&self) -> &WaitProfiles {
        &self.profiles
    }

    /// Wait for the spinner described by profile `key` to go away.
    ///
    /// With a non-zero `appear_timeout` the spinner is first given that long
    /// to show up. `timeout` defaults to the profile's wait. Returns whether
    /// the spinner was observed gone.
    pub async fn wait_for_spinner_gone<B: BrowserTrait>(
        &self,
        browser: &B,
        key: &str,
        timeout: Option<Duration>,
        appear_timeout: Duration,
    ) -> bool {
        let Some(profile) = self.profiles.get(key) else {
            debug!(profile = key, "No such spinner profile, nothing to wait for");
            return true;
        };
        let Some(xpath) = profile.xpath.as_deref() else {
            debug!(profile = key, "Profile has no spinner expression");
            return true;
        };

        if !appear_timeout.is_zero() {
            let appeared = self
                .poll_until(browser, xpath, appear_timeout, true)
                .await
                .unwrap_or(false);
            if !appeared {
                debug!(profile = key, "Spinner never appeared");
            }
        }

        let timeout = timeout.unwrap_or_else(|| profile.wait_duration());
        match self.poll_until(browser, xpath, timeout, false).await {
            Some(true) => {
                let settle = profile.sleep_duration();
                if !settle.is_zero() {
                    tokio::time::sleep(settle).await;
                }
                true
            }
            Some(false) => {
                warn!(
                    profile = key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Spinner still present after timeout, continuing"
                );
                false
            }
            None => false,
        }
    }

    /// Poll until the spinner's presence equals `want_present`.
    /// `None` means the browser errored and the wait was abandoned.
    async fn poll_until<B: BrowserTrait>(
        &self,
        browser: &B,
        xpath: &str,
        timeout: Duration,
        want_present: bool,
    ) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            match browser.find_element(xpath, ElementCondition::Visible).await {
                Ok(found) if found.is_some() == want_present => return Some(true),
                Ok(_) => {}
                Err(e) => {
                    warn!(xpath, "Spinner probe failed, giving up on wait: {}", e);
                    return None;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Some(false);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Wait until consecutive snapshots of the document body hash the same.
    ///
    /// Uses the configured number of matching samples (at least two).
    /// Returns `false` on timeout.
    pub async fn wait_for_dom_stable<B: BrowserTrait>(
        &self,
        browser: &B,
        label: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let start = Instant::now();
        let deadline = start + timeout;
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let mut last_hash: Option<u64> = None;
        let mut matches = 0u32;

        loop {
            match browser.body_html().await {
                Ok(html) => {
                    let hash = fingerprint(&html);
                    if last_hash == Some(hash) {
                        matches += 1;
                    } else {
                        matches = 1;
                        last_hash = Some(hash);
                    }
                    if matches >= self.stable_matches {
                        debug!(
                            label,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "DOM stable"
                        );
                        return true;
                    }
                }
                Err(e) => {
                    debug!(label, "Body snapshot failed: {}", e);
                    matches = 0;
                    last_hash = None;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    label,
                    timeout_ms = timeout.as_millis() as u64,
                    "DOM did not settle"
                );
                return false;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}

fn fingerprint(html: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    html.hash(&mut hasher);
    hasher.finish()
}
