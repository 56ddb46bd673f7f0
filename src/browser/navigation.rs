use super::session::AutomationSession;
use crate::core::BrowserTrait;
use crate::errors::Result;
use crate::types::{ClickOptions, ElementCondition, PortalState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Catalog keys the session itself depends on.
pub mod keys {
    pub const LOGIN_ENTER_BUTTON: &str = "LOGIN_ENTER_BUTTON";
    pub const LOGIN_UNIT_OPTION: &str = "LOGIN_UNIT_OPTION";
    pub const LOGIN_FACILITY_OPTION: &str = "LOGIN_FACILITY_OPTION";
    pub const LOGIN_PROFILE_TILE: &str = "LOGIN_PROFILE_TILE";
    pub const LOGIN_CONNECT_BUTTON: &str = "LOGIN_CONNECT_BUTTON";
    pub const MENU_CONTAINER: &str = "MENU_CONTAINER";
    pub const MENU_HOME: &str = "MENU_HOME";
    pub const MENU_CASES: &str = "MENU_CASES";
    pub const MENU_CASE_SEARCH: &str = "MENU_CASE_SEARCH";
}

struct LoginStep {
    name: &'static str,
    key: &'static str,
}

/// The login flow, in order. Each step's element is the landmark that the
/// previous step has completed.
const LOGIN_STEPS: [LoginStep; 5] = [
    LoginStep {
        name: "enter",
        key: keys::LOGIN_ENTER_BUTTON,
    },
    LoginStep {
        name: "organizational unit",
        key: keys::LOGIN_UNIT_OPTION,
    },
    LoginStep {
        name: "facility",
        key: keys::LOGIN_FACILITY_OPTION,
    },
    LoginStep {
        name: "profile",
        key: keys::LOGIN_PROFILE_TILE,
    },
    LoginStep {
        name: "connect",
        key: keys::LOGIN_CONNECT_BUTTON,
    },
];

impl<B: BrowserTrait> AutomationSession<B> {
    /// Derive the portal state from the URL and a couple of DOM landmarks,
    /// serving it from the cache while that is valid and fresh.
    pub(crate) async fn detect_state(&self) -> Result<PortalState> {
        if let Some(state) = self.cached_state() {
            debug!(state = %state, "Using cached portal state");
            return Ok(state);
        }

        let url = self.browser.current_url().await?;
        let state = if self.patterns.login.is_match(&url)
            || self.is_present(keys::LOGIN_ENTER_BUTTON).await?
        {
            PortalState::Login
        } else if self.is_present(keys::MENU_CONTAINER).await? {
            if self.patterns.case_detail.is_match(&url) {
                PortalState::CaseDetail
            } else if self.patterns.search.is_match(&url) {
                PortalState::Search
            } else {
                PortalState::Home
            }
        } else {
            PortalState::Unknown
        };

        self.update_cache(state);
        debug!(url = %url, state = %state, "Detected portal state");
        Ok(state)
    }

    async fn is_present(&self, key: &str) -> Result<bool> {
        self.landmark_present(key, "instant").await
    }

    pub(crate) async fn navigate_to(&self, desired: PortalState) -> Result<bool> {
        let current = self.detect_state().await?;
        if current == desired {
            return Ok(true);
        }
        info!(from = %current, to = %desired, "Changing portal state");

        match desired {
            PortalState::Unknown => {
                warn!("UNKNOWN is not a navigation target");
                return Ok(false);
            }
            PortalState::CaseDetail => {
                warn!("CASE_DETAIL is only reachable through a patient search");
                return Ok(false);
            }
            PortalState::Login => {
                self.browser.navigate(&self.config.portal.url).await?;
            }
            PortalState::Home | PortalState::Search => {
                let needs_login = current == PortalState::Login
                    || (current == PortalState::Unknown && self.login_required().await);
                if needs_login {
                    if !self.perform_login(false).await? {
                        error!(to = %desired, "Login failed, state unreachable");
                        return Ok(false);
                    }
                    if self.detect_state().await? == desired {
                        return Ok(true);
                    }
                }

                let steps: &[(&str, &str)] = if desired == PortalState::Home {
                    &[("home menu", keys::MENU_HOME)]
                } else {
                    &[
                        ("cases menu", keys::MENU_CASES),
                        ("case search", keys::MENU_CASE_SEARCH),
                    ]
                };
                for &(step, key) in steps {
                    if !self.click_by_key(key, ClickOptions::default()).await? {
                        error!(step, key, to = %desired, "Navigation step failed");
                        return Ok(false);
                    }
                }
            }
        }

        self.invalidate_cache();
        let reached = self.detect_state().await?;
        if reached == desired {
            info!(state = %reached, "Portal state reached");
        } else {
            warn!(expected = %desired, actual = %reached, "Portal state not reached");
        }
        Ok(reached == desired)
    }

    /// Walk the five-step login flow.
    ///
    /// Returns `Ok(true)` at once, without touching the page, when the
    /// session is already open. A step whose element never shows up ends
    /// the attempt with `Ok(false)`.
    pub(crate) async fn perform_login(&self, retry: bool) -> Result<bool> {
        if !self.login_required().await {
            info!("Session already open, skipping login");
            return Ok(true);
        }

        if retry {
            info!(url = %self.config.portal.url, "Reloading portal before login retry");
            self.browser.navigate(&self.config.portal.url).await?;
            self.invalidate_cache();
        }

        let landmark_timeout = self.config.portal.landmark_timeout();
        let options = ClickOptions::default().with_wait_profile("slow");
        for (number, step) in LOGIN_STEPS.iter().enumerate() {
            if !self.click_by_key(step.key, options).await? {
                error!(
                    step = step.name,
                    number = number + 1,
                    key = step.key,
                    "Login step failed: element not found"
                );
                return Ok(false);
            }
            debug!(step = step.name, number = number + 1, "Login step done");

            if let Some(next) = LOGIN_STEPS.get(number + 1) {
                if !self.wait_for_landmark(next.key, landmark_timeout).await {
                    debug!(landmark = next.key, "Landmark not seen yet, continuing");
                }
            }
        }

        let confirmed = self
            .login_confirmed(self.config.portal.login_verify_timeout())
            .await?;
        self.invalidate_cache();
        if confirmed {
            info!("Login confirmed");
        } else {
            error!("Login not confirmed: still on the login page");
        }
        Ok(confirmed)
    }

    /// Tolerant wait: a missing landmark is reported, never raised.
    async fn wait_for_landmark(&self, key: &str, timeout: Duration) -> bool {
        let Some(set) = self.locator_set(key) else {
            return false;
        };
        match self
            .selectors
            .resolve(&self.browser, set, ElementCondition::Visible, timeout)
            .await
        {
            Ok(found) => found.is_some(),
            Err(e) => {
                debug!(landmark = key, "Landmark wait failed: {}", e);
                false
            }
        }
    }

    /// Either the URL left the login pattern, or it carries the post-login
    /// landing substring.
    async fn login_confirmed(&self, timeout: Duration) -> Result<bool> {
        let landing = self.config.portal.post_login_url_substring.as_str();
        let deadline = Instant::now() + timeout;
        let poll = self.config.selectors.poll_interval();

        loop {
            let url = self.browser.current_url().await?;
            if !self.patterns.login.is_match(&url) || (!landing.is_empty() && url.contains(landing))
            {
                debug!(url = %url, "Left the login page");
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Config, SessionTrait};
    use crate::selectors::{LocatorCatalog, LocatorSet};
    use crate::state::RunControl;
    use crate::testing::{MockBrowser, MockEffect, MockNode};
    use crate::wait::WaitProfiles;
    use std::sync::Arc;

    const LOGIN_URL: &str = "https://portal.test/#/login";
    const HOME_URL: &str = "https://portal.test/#/actualizaciones";

    const ENTER: &str = "//button[@id='enter']";
    const UNIT: &str = "//li[@id='unit']";
    const FACILITY: &str = "//li[@id='facility']";
    const PROFILE: &str = "//div[@id='profile']";
    const CONNECT: &str = "//button[@id='connect']";
    const MENU: &str = "//nav[@id='menu']";
    const HOME: &str = "//a[@id='home']";
    const CASES: &str = "//a[@id='cases']";
    const CASE_SEARCH: &str = "//a[@id='case-search']";

    fn session(browser: MockBrowser) -> AutomationSession<MockBrowser> {
        let mut catalog = LocatorCatalog::default();
        for (key, xpath) in [
            (keys::LOGIN_ENTER_BUTTON, ENTER),
            (keys::LOGIN_UNIT_OPTION, UNIT),
            (keys::LOGIN_FACILITY_OPTION, FACILITY),
            (keys::LOGIN_PROFILE_TILE, PROFILE),
            (keys::LOGIN_CONNECT_BUTTON, CONNECT),
            (keys::MENU_CONTAINER, MENU),
            (keys::MENU_HOME, HOME),
            (keys::MENU_CASES, CASES),
            (keys::MENU_CASE_SEARCH, CASE_SEARCH),
        ] {
            catalog.insert(LocatorSet::new(key, [xpath]));
        }

        let mut config = Config::default();
        config.portal.url = LOGIN_URL.to_string();
        AutomationSession::with_parts(
            browser,
            config,
            catalog,
            WaitProfiles::default(),
            Arc::new(RunControl::new()),
        )
        .unwrap()
    }

    /// Login page whose steps reveal each other; `connect` lands on `landing_url`.
    fn login_page(landing_url: &str) -> MockBrowser {
        let browser = MockBrowser::new().with_url(LOGIN_URL);
        browser.add_node(ENTER, MockNode::new("enter"));
        browser.on_click("enter", MockEffect::new().add(UNIT, MockNode::new("unit")));
        browser.on_click("unit", MockEffect::new().add(FACILITY, MockNode::new("facility")));
        browser.on_click("facility", MockEffect::new().add(PROFILE, MockNode::new("profile")));
        browser.on_click("profile", MockEffect::new().add(CONNECT, MockNode::new("connect")));
        browser.on_click(
            "connect",
            MockEffect::new()
                .set_url(landing_url)
                .remove(ENTER)
                .add(MENU, MockNode::new("menu")),
        );
        browser
    }

    fn home_page() -> MockBrowser {
        let browser = MockBrowser::new().with_url(HOME_URL);
        browser.add_node(MENU, MockNode::new("menu"));
        browser
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_is_a_no_op_when_session_open() {
        let session = session(home_page());

        assert!(session.login(false).await.unwrap());
        assert_eq!(session.browser().total_clicks(), 0);
        assert!(session.browser().navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_login_flow() {
        let session = session(login_page(HOME_URL));

        assert!(session.login(false).await.unwrap());
        assert_eq!(
            session.browser().clicks(),
            vec!["enter", "unit", "facility", "profile", "connect"]
        );
        assert!(!session.is_cache_valid());
        assert!(!session.is_session_closed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_retry_reloads_portal_first() {
        let session = session(login_page(HOME_URL));

        assert!(session.login(true).await.unwrap());
        assert_eq!(session.browser().navigations(), vec![LOGIN_URL.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_stops_at_missing_step() {
        let browser = login_page(HOME_URL);
        browser.on_click("unit", MockEffect::new());
        let session = session(browser);

        assert!(!session.login(false).await.unwrap());
        assert_eq!(session.browser().clicks(), vec!["enter", "unit"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_unconfirmed_when_url_never_changes() {
        let session = session(login_page(LOGIN_URL));

        let start = Instant::now();
        assert!(!session.login(false).await.unwrap());
        assert_eq!(session.browser().total_clicks(), 5);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_confirmed_by_landing_substring() {
        // still under the login path, but on the updates page some accounts land on
        let session = session(login_page("https://portal.test/login/#/actualizaciones"));
        assert!(session.login(false).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detects_states_from_url_and_landmarks() {
        let session = session(login_page(HOME_URL));
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Login);

        let session = session_on(home_page(), HOME_URL);
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Home);

        let session = session_on(home_page(), "https://portal.test/#/busqueda");
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Search);

        let session = session_on(home_page(), "https://portal.test/#/cartola/123");
        assert_eq!(
            session.detect_current_state().await.unwrap(),
            PortalState::CaseDetail
        );

        let session = session_on(MockBrowser::new(), "https://elsewhere.test/");
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Unknown);
    }

    fn session_on(browser: MockBrowser, url: &str) -> AutomationSession<MockBrowser> {
        browser.set_url(url);
        session(browser)
    }

    #[tokio::test(start_paused = true)]
    async fn test_detected_state_is_cached_until_invalidated_or_stale() {
        let session = session(home_page());
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Home);

        session.browser().set_url("https://portal.test/#/busqueda");
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Home);

        session.invalidate_cache();
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Search);

        session.browser().set_url(HOME_URL);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(session.detect_current_state().await.unwrap(), PortalState::Home);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_state_walks_menu_to_search() {
        let browser = home_page();
        browser.add_node(CASES, MockNode::new("cases"));
        browser.on_click(
            "cases",
            MockEffect::new().add(CASE_SEARCH, MockNode::new("case-search")),
        );
        browser.on_click(
            "case-search",
            MockEffect::new().set_url("https://portal.test/#/busqueda"),
        );
        let session = session(browser);

        assert!(session.ensure_state(PortalState::Search).await.unwrap());
        assert_eq!(session.browser().clicks(), vec!["cases", "case-search"]);

        // already there: nothing more to click
        assert!(session.ensure_state(PortalState::Search).await.unwrap());
        assert_eq!(session.browser().total_clicks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_state_logs_in_first() {
        let session = session(login_page(HOME_URL));

        assert!(session.ensure_state(PortalState::Home).await.unwrap());
        assert_eq!(session.browser().total_clicks(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_state_reports_unreachable_states() {
        let session = session(home_page());

        assert!(!session.ensure_state(PortalState::CaseDetail).await.unwrap());
        // no MENU_CASES on the page
        assert!(!session.ensure_state(PortalState::Search).await.unwrap());
    }
}
