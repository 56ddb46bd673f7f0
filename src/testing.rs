//! Scripted in-memory browser for exercising the core without Chrome.
//!
//! Nodes are registered under the exact locator string that should find
//! them. Time-based behaviour uses `tokio::time`, so tests can run on a
//! paused clock.

use crate::core::BrowserTrait;
use crate::errors::{AutomationError, Result};
use crate::types::ElementCondition;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

pub use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone)]
pub struct MockNode {
    id: String,
    appear_after: Duration,
    disappear_after: Option<Duration>,
    visible: bool,
    enabled: bool,
}

impl MockNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            appear_after: Duration::ZERO,
            disappear_after: None,
            visible: true,
            enabled: true,
        }
    }

    pub fn appear_after(mut self, delay: Duration) -> Self {
        self.appear_after = delay;
        self
    }

    pub fn disappear_after(mut self, delay: Duration) -> Self {
        self.disappear_after = Some(delay);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Failure injected into the next native or scripted click on a node.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Stale,
    Intercepted,
    SessionLost,
    Driver(String),
}

impl MockFailure {
    fn into_error(self, id: &str) -> AutomationError {
        match self {
            MockFailure::Stale => AutomationError::StaleElement(format!("{} detached", id)),
            MockFailure::Intercepted => {
                AutomationError::NotInteractable(format!("click on {} intercepted", id))
            }
            MockFailure::SessionLost => {
                AutomationError::SessionLost("no such window: target window already closed".into())
            }
            MockFailure::Driver(message) => AutomationError::Driver(message),
        }
    }
}

/// Page changes applied after a successful click on a node.
#[derive(Debug, Clone, Default)]
pub struct MockEffect {
    set_url: Option<String>,
    add: Vec<(String, MockNode)>,
    remove: Vec<String>,
    rerender: bool,
}

impl MockEffect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_url(mut self, url: impl Into<String>) -> Self {
        self.set_url = Some(url.into());
        self
    }

    pub fn add(mut self, locator: impl Into<String>, node: MockNode) -> Self {
        self.add.push((locator.into(), node));
        self
    }

    pub fn remove(mut self, locator: impl Into<String>) -> Self {
        self.remove.push(locator.into());
        self
    }

    /// Invalidate every element handle handed out so far.
    pub fn rerender(mut self) -> Self {
        self.rerender = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MockElement {
    pub id: String,
    pub locator: String,
    generation: u64,
}

#[derive(Debug)]
struct PlacedNode {
    node: MockNode,
    appears_at: Instant,
    disappears_at: Option<Instant>,
}

impl PlacedNode {
    fn place(node: MockNode) -> Self {
        let now = Instant::now();
        Self {
            appears_at: now + node.appear_after,
            disappears_at: node.disappear_after.map(|d| now + d),
            node,
        }
    }

    fn is_attached(&self, now: Instant) -> bool {
        now >= self.appears_at && self.disappears_at.map(|at| now < at).unwrap_or(true)
    }
}

#[derive(Debug)]
struct Page {
    url: String,
    nodes: HashMap<String, PlacedNode>,
    generation: u64,
    session_lost: bool,
    body_mutating_until: Option<Instant>,
    click_failures: HashMap<String, VecDeque<MockFailure>>,
    script_click_failures: HashMap<String, VecDeque<MockFailure>>,
    effects: HashMap<String, MockEffect>,
    clicks: Vec<String>,
    script_clicks: Vec<String>,
    scrolls: Vec<String>,
    navigations: Vec<String>,
}

impl Page {
    fn attached(&self, id: &str, now: Instant) -> bool {
        self.nodes
            .values()
            .any(|placed| placed.node.id == id && placed.is_attached(now))
    }

    fn apply(&mut self, effect: MockEffect) {
        if let Some(url) = effect.set_url {
            self.url = url;
        }
        for locator in effect.remove {
            self.nodes.remove(&locator);
        }
        for (locator, node) in effect.add {
            self.nodes.insert(locator, PlacedNode::place(node));
        }
        if effect.rerender {
            self.generation += 1;
        }
    }
}

pub struct MockBrowser {
    page: Mutex<Page>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            page: Mutex::new(Page {
                url: "about:blank".to_string(),
                nodes: HashMap::new(),
                generation: 0,
                session_lost: false,
                body_mutating_until: None,
                click_failures: HashMap::new(),
                script_click_failures: HashMap::new(),
                effects: HashMap::new(),
                clicks: Vec::new(),
                script_clicks: Vec::new(),
                scrolls: Vec::new(),
                navigations: Vec::new(),
            }),
        }
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.set_url(url);
        self
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.page.lock().url = url.into();
    }

    pub fn add_node(&self, locator: impl Into<String>, node: MockNode) {
        self.page
            .lock()
            .nodes
            .insert(locator.into(), PlacedNode::place(node));
    }

    pub fn remove_node(&self, locator: &str) {
        self.page.lock().nodes.remove(locator);
    }

    /// Make every handed-out element handle stale.
    pub fn rerender(&self) {
        self.page.lock().generation += 1;
    }

    pub fn kill_session(&self) {
        self.page.lock().session_lost = true;
    }

    /// Body markup keeps changing until `duration` from now.
    pub fn mutate_body_until(&self, duration: Duration) {
        self.page.lock().body_mutating_until = Some(Instant::now() + duration);
    }

    pub fn fail_clicks(&self, id: &str, failures: impl IntoIterator<Item = MockFailure>) {
        self.page
            .lock()
            .click_failures
            .entry(id.to_string())
            .or_default()
            .extend(failures);
    }

    pub fn fail_script_clicks(&self, id: &str, failures: impl IntoIterator<Item = MockFailure>) {
        self.page
            .lock()
            .script_click_failures
            .entry(id.to_string())
            .or_default()
            .extend(failures);
    }

    pub fn on_click(&self, id: &str, effect: MockEffect) {
        self.page.lock().effects.insert(id.to_string(), effect);
    }

    /// Ids of nodes that received a native click, in order.
    pub fn clicks(&self) -> Vec<String> {
        self.page.lock().clicks.clone()
    }

    pub fn script_clicks(&self) -> Vec<String> {
        self.page.lock().script_clicks.clone()
    }

    pub fn total_clicks(&self) -> usize {
        let page = self.page.lock();
        page.clicks.len() + page.script_clicks.len()
    }

    pub fn scrolls(&self) -> Vec<String> {
        self.page.lock().scrolls.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.page.lock().navigations.clone()
    }

    fn check_alive(page: &Page) -> Result<()> {
        if page.session_lost {
            Err(AutomationError::SessionLost(
                "no such window: target window already closed".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn check_handle(page: &Page, element: &MockElement) -> Result<()> {
        Self::check_alive(page)?;
        if element.generation != page.generation || !page.attached(&element.id, Instant::now()) {
            return Err(AutomationError::StaleElement(format!(
                "{} is no longer attached",
                element.id
            )));
        }
        Ok(())
    }

    fn perform_click(&self, element: &MockElement, scripted: bool) -> Result<()> {
        let mut page = self.page.lock();
        Self::check_handle(&page, element)?;

        let queue = if scripted {
            &mut page.script_click_failures
        } else {
            &mut page.click_failures
        };
        if let Some(failure) = queue.get_mut(&element.id).and_then(VecDeque::pop_front) {
            if matches!(failure, MockFailure::SessionLost) {
                page.session_lost = true;
            }
            return Err(failure.into_error(&element.id));
        }

        if scripted {
            page.script_clicks.push(element.id.clone());
        } else {
            page.clicks.push(element.id.clone());
        }
        if let Some(effect) = page.effects.remove(&element.id) {
            page.apply(effect);
        }
        Ok(())
    }
}

/// Crude syntax check standing in for the browser's XPath parser.
fn is_well_formed(locator: &str) -> bool {
    let opens = locator.matches('[').count();
    let closes = locator.matches(']').count();
    let quotes = locator.matches('\'').count();
    !locator.trim().is_empty() && opens == closes && quotes % 2 == 0
}

#[async_trait]
impl BrowserTrait for MockBrowser {
    type Element = MockElement;

    async fn find_element(
        &self,
        xpath: &str,
        condition: ElementCondition,
    ) -> Result<Option<Self::Element>> {
        let page = self.page.lock();
        Self::check_alive(&page)?;
        if !is_well_formed(xpath) {
            return Err(AutomationError::InvalidSelector(format!(
                "'{}' is not a valid XPath expression",
                xpath
            )));
        }

        let Some(placed) = page.nodes.get(xpath) else {
            return Ok(None);
        };
        if !placed.is_attached(Instant::now()) {
            return Ok(None);
        }
        let satisfied = match condition {
            ElementCondition::Presence => true,
            ElementCondition::Visible => placed.node.visible,
            ElementCondition::Clickable => placed.node.visible && placed.node.enabled,
        };
        Ok(satisfied.then(|| MockElement {
            id: placed.node.id.clone(),
            locator: xpath.to_string(),
            generation: page.generation,
        }))
    }

    async fn click(&self, element: &Self::Element) -> Result<()> {
        self.perform_click(element, false)
    }

    async fn script_click(&self, element: &Self::Element) -> Result<()> {
        self.perform_click(element, true)
    }

    async fn scroll_into_view(&self, element: &Self::Element) -> Result<()> {
        let mut page = self.page.lock();
        Self::check_handle(&page, element)?;
        page.scrolls.push(element.id.clone());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.page.lock();
        Self::check_alive(&page)?;
        Ok(page.url.clone())
    }

    async fn body_html(&self) -> Result<String> {
        let page = self.page.lock();
        Self::check_alive(&page)?;
        let now = Instant::now();
        if let Some(until) = page.body_mutating_until {
            if now < until {
                return Ok(format!(
                    "<div>rendering {}</div>",
                    (until - now).as_millis()
                ));
            }
        }
        let mut ids: Vec<&str> = page
            .nodes
            .values()
            .filter(|placed| placed.is_attached(now))
            .map(|placed| placed.node.id.as_str())
            .collect();
        ids.sort_unstable();
        Ok(format!("<body>{}</body>", ids.join("")))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut page = self.page.lock();
        Self::check_alive(&page)?;
        page.url = url.to_string();
        page.navigations.push(url.to_string());
        page.generation += 1;
        Ok(())
    }

    fn is_running(&self) -> bool {
        !self.page.lock().session_lost
    }

    async fn close(&mut self) -> Result<()> {
        self.page.lock().session_lost = true;
        Ok(())
    }
}
