use crate::core::config::PortalConfig;
use crate::core::{BrowserTrait, Config, SessionTrait};
use crate::errors::{AutomationError, Result};
use crate::resilience::{classify, CircuitBreaker, ErrorAction, RetryPolicy};
use crate::selectors::{LocatorCatalog, LocatorSet, SelectorEngine};
use crate::state::{RunControl, SessionState};
use crate::types::{ClickOptions, ElementCondition, PortalState};
use crate::wait::{SmartWait, WaitProfiles};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// URL patterns compiled once from [`PortalConfig`].
pub(crate) struct PortalPatterns {
    pub login: Regex,
    pub search: Regex,
    pub case_detail: Regex,
}

impl PortalPatterns {
    fn compile(portal: &PortalConfig) -> Result<Self> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| AutomationError::Configuration(format!("portal.{}: {}", name, e)))
        };
        Ok(Self {
            login: compile("login_url_pattern", &portal.login_url_pattern)?,
            search: compile("search_url_pattern", &portal.search_url_pattern)?,
            case_detail: compile("case_detail_url_pattern", &portal.case_detail_url_pattern)?,
        })
    }
}

/// One live browser session against the portal.
///
/// Every operation takes `&self`: the cached navigation state and run
/// context sit behind a lock so retried closures can borrow the session.
pub struct AutomationSession<B: BrowserTrait> {
    pub(crate) browser: B,
    pub(crate) config: Config,
    pub(crate) catalog: LocatorCatalog,
    pub(crate) selectors: SelectorEngine,
    pub(crate) waits: SmartWait,
    pub(crate) click_retry: RetryPolicy,
    pub(crate) patterns: PortalPatterns,
    state: RwLock<SessionState>,
    run: Arc<RunControl>,
    breaker: Arc<CircuitBreaker>,
    consecutive_heals: AtomicU32,
}

impl<B: BrowserTrait> AutomationSession<B> {
    /// Build a session with the built-in locator catalog and wait profiles.
    pub fn new(browser: B, config: Config) -> Result<Self> {
        Self::with_parts(
            browser,
            config,
            LocatorCatalog::sigges_default(),
            WaitProfiles::default(),
            Arc::new(RunControl::new()),
        )
    }

    pub fn with_parts(
        browser: B,
        config: Config,
        catalog: LocatorCatalog,
        profiles: WaitProfiles,
        run: Arc<RunControl>,
    ) -> Result<Self> {
        config.validate()?;
        let patterns = PortalPatterns::compile(&config.portal)?;

        let selectors = SelectorEngine::from_config(&config.selectors);
        let drifting = selectors.drifting_keys();
        if !drifting.is_empty() {
            warn!(
                keys = ?drifting,
                "Locator drift: fallbacks are winning more often than primaries"
            );
        }

        let waits = SmartWait::new(
            profiles,
            config.selectors.poll_interval(),
            config.portal.dom_stable_matches,
        );
        let breaker = Arc::new(CircuitBreaker::new(
            "click",
            config.retry.breaker_failure_threshold,
            config.retry.breaker_cooldown(),
        ));
        let click_retry = RetryPolicy::new(config.retry.click_max_attempts, config.retry.base_delay())
            .with_breaker(breaker.clone());

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            run = %run_id,
            headless = config.browser.headless,
            locators = catalog.len(),
            "Automation session ready"
        );

        Ok(Self {
            state: RwLock::new(SessionState::new(run_id, config.browser.headless)),
            browser,
            config,
            catalog,
            selectors,
            waits,
            click_retry,
            patterns,
            run,
            breaker,
            consecutive_heals: AtomicU32::new(0),
        })
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run_control(&self) -> &Arc<RunControl> {
        &self.run
    }

    /// Breaker guarding clicks. Shared with whoever else should trip it.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn selectors(&self) -> &SelectorEngine {
        &self.selectors
    }

    /// Snapshot of the session record.
    pub fn session_state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn set_context(&self, patient: Option<String>, stage: Option<String>) {
        self.state.write().set_context(patient, stage);
    }

    pub fn invalidate_cache(&self) {
        self.state.write().invalidate_cache();
    }

    pub fn is_cache_valid(&self) -> bool {
        self.state.read().is_cache_valid()
    }

    pub(crate) fn cached_state(&self) -> Option<PortalState> {
        self.state
            .read()
            .cached_state(self.config.portal.state_cache_ttl())
    }

    pub(crate) fn update_cache(&self, state: PortalState) {
        self.state.write().update_cache(state);
    }

    pub(crate) fn mark_health_check(&self) {
        self.state.write().mark_health_check();
    }

    pub(crate) fn locator_set(&self, key: &str) -> Option<&LocatorSet> {
        let set = self.catalog.get(key);
        if set.is_none() {
            error!(key, "No locators registered for key");
        }
        set
    }

    pub(crate) fn clicked_successfully(&self) {
        self.consecutive_heals.store(0, Ordering::SeqCst);
    }

    fn span(&self) -> tracing::Span {
        self.state.read().span()
    }

    /// The orchestrator's entry point for an error that escaped a session
    /// operation. Call it once per error.
    ///
    /// HEAL verdicts are counted; once `retry.max_consecutive_heals` pile up
    /// without a successful click in between, the run is marked as errored.
    pub fn handle_error(&self, err: &AutomationError) -> ErrorAction {
        let action = classify(err);
        if action != ErrorAction::Heal {
            debug!(action = %action, error = %err, "Error handled");
            return action;
        }

        let _guard = self.span().entered();
        let heals = self.consecutive_heals.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = self.config.retry.max_consecutive_heals;
        warn!(heals, limit, "Session loss recorded");
        if limit > 0 && heals >= limit {
            error!(heals, "Too many consecutive session losses, stopping run");
            self.run.fail(format!(
                "{} consecutive session losses, last: {}",
                heals, err
            ));
        }
        action
    }

    /// Swap in a freshly launched browser after a HEAL.
    ///
    /// The old browser is closed, the circuit is reset and the cached state
    /// dropped; drift statistics and run context carry over.
    pub async fn reattach(&mut self, browser: B) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Closing the previous browser failed: {}", e);
        }
        self.browser = browser;
        self.breaker.reset();
        self.invalidate_cache();
        info!(run = %self.state.read().run_id, "Browser re-attached");
        Ok(())
    }

    /// Wait for the page body to stop changing.
    pub async fn wait_for_dom_stable(&self, label: &str, timeout: Duration) -> bool {
        self.waits
            .wait_for_dom_stable(
                &self.browser,
                label,
                timeout,
                self.config.selectors.poll_interval(),
            )
            .instrument(self.span())
            .await
    }

    /// Log the verdict for a failing operation and hand the error back.
    /// Counting is left to [`handle_error`](Self::handle_error).
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let action = classify(err);
            let _guard = self.span().entered();
            match action {
                ErrorAction::Heal => error!(action = %action, error = %err, "Browser session lost"),
                ErrorAction::Retry => warn!(action = %action, error = %err, "Transient failure"),
                ErrorAction::Fail => error!(action = %action, error = %err, "Operation failed"),
                ErrorAction::LogOnly => warn!(action = %action, error = %err, "Ignoring error"),
            }
        }
        result
    }
}

#[async_trait]
impl<B: BrowserTrait> SessionTrait<B> for AutomationSession<B> {
    async fn find(
        &self,
        key: &str,
        condition: ElementCondition,
        wait_profile: &str,
    ) -> Result<Option<B::Element>> {
        let result = self
            .find_by_key(key, condition, wait_profile)
            .instrument(self.span())
            .await;
        self.observe(result)
    }

    async fn click(&self, key: &str, options: ClickOptions<'_>) -> Result<bool> {
        let result = self
            .click_by_key(key, options)
            .instrument(self.span())
            .await;
        self.observe(result)
    }

    async fn validate_connection(&self) -> (bool, String) {
        self.probe_connection().instrument(self.span()).await
    }

    async fn is_session_closed(&self) -> bool {
        self.login_required().instrument(self.span()).await
    }

    async fn detect_current_state(&self) -> Result<PortalState> {
        let result = self.detect_state().instrument(self.span()).await;
        self.observe(result)
    }

    async fn ensure_state(&self, desired: PortalState) -> Result<bool> {
        let result = self.navigate_to(desired).instrument(self.span()).await;
        self.observe(result)
    }

    async fn login(&self, retry: bool) -> Result<bool> {
        let result = self.perform_login(retry).instrument(self.span()).await;
        self.observe(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;
    use crate::testing::MockBrowser;

    fn session() -> AutomationSession<MockBrowser> {
        AutomationSession::new(MockBrowser::new(), Config::default()).unwrap()
    }

    #[test]
    fn test_heal_escalates_after_limit() {
        let session = session();
        session.run_control().start();
        let lost = AutomationError::SessionLost("target closed".to_string());

        assert_eq!(session.handle_error(&lost), ErrorAction::Heal);
        assert_eq!(session.handle_error(&lost), ErrorAction::Heal);
        assert!(session.run_control().should_continue());

        assert_eq!(session.handle_error(&lost), ErrorAction::Heal);
        assert_eq!(session.run_control().state(), RunState::Error);
        assert!(session.run_control().last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_lost_session_counts_once() {
        let browser = MockBrowser::new();
        browser.kill_session();
        let session = AutomationSession::new(browser, Config::default()).unwrap();
        session.run_control().start();

        for _ in 0..2 {
            let err = session.login(false).await.unwrap_err();
            assert_eq!(session.handle_error(&err), ErrorAction::Heal);
        }
        assert_eq!(session.run_control().state(), RunState::Running);

        let lost = AutomationError::SessionLost("target closed".to_string());
        session.handle_error(&lost);
        assert_eq!(session.run_control().state(), RunState::Error);
    }

    #[test]
    fn test_successful_click_resets_heal_count() {
        let session = session();
        session.run_control().start();
        let lost = AutomationError::SessionLost("target closed".to_string());

        session.handle_error(&lost);
        session.handle_error(&lost);
        session.clicked_successfully();
        session.handle_error(&lost);
        assert!(session.run_control().should_continue());
    }

    #[test]
    fn test_non_heal_errors_do_not_count() {
        let session = session();
        session.run_control().start();
        for _ in 0..5 {
            let stale = AutomationError::StaleElement("gone".to_string());
            assert_eq!(session.handle_error(&stale), ErrorAction::Retry);
        }
        assert_eq!(session.run_control().state(), RunState::Running);
    }

    #[test]
    fn test_bad_portal_pattern_is_rejected() {
        let mut config = Config::default();
        config.portal.search_url_pattern = "[".to_string();
        let result = AutomationSession::new(MockBrowser::new(), config);
        assert!(matches!(result, Err(AutomationError::Configuration(_))));
    }

    #[test]
    fn test_context_lands_in_snapshot() {
        let session = session();
        session.set_context(Some("12.345.678-9".to_string()), Some("search".to_string()));
        let state = session.session_state();
        assert_eq!(state.current_patient.as_deref(), Some("12.345.678-9"));
        assert_eq!(state.current_stage.as_deref(), Some("search"));
        assert!(!state.run_id.is_empty());
    }

    #[tokio::test]
    async fn test_reattach_resets_breaker_and_cache() {
        let mut session = session();
        session.update_cache(PortalState::Home);
        for _ in 0..5 {
            session.breaker().record_failure();
        }
        assert!(!session.breaker().try_acquire());

        tokio_test::assert_ok!(session.reattach(MockBrowser::new()).await);
        assert!(!session.is_cache_valid());
        assert!(session.breaker().try_acquire());
    }
}
