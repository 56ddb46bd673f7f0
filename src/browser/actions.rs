use super::navigation::keys::LOGIN_ENTER_BUTTON;
use super::session::AutomationSession;
use crate::core::BrowserTrait;
use crate::errors::{AutomationError, Result};
use crate::resilience::{classify, ErrorAction};
use crate::selectors::LocatorSet;
use crate::types::{ClickOptions, ElementCondition};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a spinner gets to show up after a click before we stop waiting for it.
const POST_CLICK_SPINNER_APPEAR: Duration = Duration::from_millis(300);

/// Errors a script click cannot work around: the handle or the whole session is gone.
fn must_reresolve(err: &AutomationError) -> bool {
    err.is_session_fatal() || matches!(err, AutomationError::StaleElement(_))
}

impl<B: BrowserTrait> AutomationSession<B> {
    pub(crate) async fn find_by_key(
        &self,
        key: &str,
        condition: ElementCondition,
        wait_profile: &str,
    ) -> Result<Option<B::Element>> {
        let Some(set) = self.locator_set(key) else {
            return Ok(None);
        };
        let profile = self.waits.profiles().resolve(wait_profile);

        let resolved = self
            .selectors
            .resolve(&self.browser, set, condition, profile.wait_duration())
            .await?;
        let Some(resolved) = resolved else {
            return Ok(None);
        };

        let settle = profile.sleep_duration();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok(Some(resolved.element))
    }

    pub(crate) async fn click_by_key(&self, key: &str, options: ClickOptions<'_>) -> Result<bool> {
        self.invalidate_cache();
        let Some(set) = self.locator_set(key) else {
            return Ok(false);
        };

        let label = format!("click {}", key);
        let result = self
            .click_retry
            .run(&label, move || async move { self.click_once(set, options).await })
            .await;

        if let Ok(true) = result {
            self.clicked_successfully();
        }
        result
    }

    /// A single click attempt. Stale handles and lost sessions propagate so the
    /// retry layer can re-resolve; other native click failures fall back to a
    /// script click.
    async fn click_once(&self, set: &LocatorSet, options: ClickOptions<'_>) -> Result<bool> {
        self.invalidate_cache();
        self.waits
            .wait_for_spinner_gone(&self.browser, options.spinner_profile, None, Duration::ZERO)
            .await;

        let timeout = self.waits.profiles().resolve(options.wait_profile).wait_duration();
        let resolved = self
            .selectors
            .resolve(&self.browser, set, ElementCondition::Clickable, timeout)
            .await?;
        let Some(resolved) = resolved else {
            warn!(key = set.key(), "Click target not found");
            return Ok(false);
        };
        let element = resolved.element;

        if options.scroll_first {
            match self.browser.scroll_into_view(&element).await {
                Ok(()) => {}
                Err(e) if must_reresolve(&e) => return Err(e),
                Err(e) => debug!(key = set.key(), "Scroll into view failed: {}", e),
            }
        }

        match self.browser.click(&element).await {
            Ok(()) => {}
            Err(e) if must_reresolve(&e) => return Err(e),
            Err(e) => {
                warn!(
                    key = set.key(),
                    locator = %resolved.locator,
                    "Native click failed ({}), falling back to script click",
                    e
                );
                self.browser.script_click(&element).await?;
            }
        }

        if options.wait_spinner_after {
            self.waits
                .wait_for_spinner_gone(
                    &self.browser,
                    options.spinner_profile,
                    None,
                    POST_CLICK_SPINNER_APPEAR,
                )
                .await;
        }
        debug!(key = set.key(), index = resolved.index, "Clicked");
        Ok(true)
    }

    /// Presence check for a page landmark. The primary locator gets the
    /// profile's wait; fallbacks get a single look.
    pub(crate) async fn landmark_present(&self, key: &str, wait_profile: &str) -> Result<bool> {
        let Some(set) = self.locator_set(key) else {
            return Ok(false);
        };
        let timeout = self.waits.profiles().resolve(wait_profile).wait_duration();
        let found = self
            .selectors
            .probe(&self.browser, set, ElementCondition::Visible, timeout)
            .await?;
        Ok(found.is_some())
    }

    pub(crate) async fn probe_connection(&self) -> (bool, String) {
        self.mark_health_check();
        if !self.browser.is_running() {
            warn!("Connection check: browser is not running");
            return (false, "session lost: browser is not running".to_string());
        }
        match self.browser.current_url().await {
            Ok(url) => (true, format!("alive at {}", url)),
            Err(e) if classify(&e) == ErrorAction::Heal => {
                warn!("Connection check: session lost: {}", e);
                (false, format!("session lost: {}", e))
            }
            Err(e) => {
                warn!("Connection check: unknown error: {}", e);
                (false, format!("unknown error: {}", e))
            }
        }
    }

    /// Login URL, or a login-only landmark on screen. Any probe failure counts
    /// as closed.
    pub(crate) async fn login_required(&self) -> bool {
        let url = match self.browser.current_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not read URL, assuming session closed: {}", e);
                return true;
            }
        };
        if self.patterns.login.is_match(&url) {
            debug!(url = %url, "Login URL showing");
            return true;
        }

        match self.landmark_present(LOGIN_ENTER_BUTTON, "instant").await {
            Ok(present) => present,
            Err(e) => {
                warn!("Login landmark probe failed, assuming session closed: {}", e);
                true
            }
        }
    }
}
