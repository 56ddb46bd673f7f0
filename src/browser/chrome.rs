use crate::core::config::BrowserConfig;
use crate::core::BrowserTrait;
use crate::errors::{AutomationError, Result};
use crate::resilience::classify::indicates_unreachable;
use crate::types::ElementCondition;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::DOM::NodeId;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Handle to a node resolved in the Chrome tab.
///
/// Only the DOM node id is kept; the live element is rebuilt for each action
/// so a node removed by a re-render surfaces as a stale reference.
#[derive(Debug, Clone)]
pub struct ChromeElement {
    pub node_id: NodeId,
    pub locator: String,
}

/// Chrome browser implementation
pub struct ChromeBrowser {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeBrowser {
    pub fn launch(config: &BrowserConfig) -> Result<Self> {
        let window_size_arg = format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        );

        let user_agent_arg = config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];

        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }

        for arg in &config.args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .idle_browser_timeout(Duration::from_millis(config.idle_timeout_ms))
            .build()
            .map_err(|e| AutomationError::LaunchFailed(e.to_string()))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| AutomationError::LaunchFailed(e.to_string()))?;

        let tab = browser
            .new_tab()
            .map_err(|e| AutomationError::LaunchFailed(e.to_string()))?;

        info!(headless = config.headless, "Chrome launched");
        Ok(Self {
            browser: Some(browser),
            tab: Some(tab),
        })
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| AutomationError::SessionLost("no active tab".to_string()))
    }

    fn element<'a>(&self, tab: &'a Tab, handle: &ChromeElement) -> Result<Element<'a>> {
        Element::new(tab, handle.node_id).map_err(|e| match map_chrome_error(e) {
            AutomationError::Driver(msg) => AutomationError::StaleElement(format!(
                "{} ({})",
                handle.locator, msg
            )),
            other => other,
        })
    }

    fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .tab()?
            .evaluate(script, false)
            .map_err(map_chrome_error)?;
        Ok(result.value.unwrap_or(Value::Null))
    }
}

/// Translate a raw driver error into the crate taxonomy by its message.
pub fn map_chrome_error(err: anyhow::Error) -> AutomationError {
    let message = err.to_string();
    let lower = message.to_lowercase();

    if lower.contains("connection is closed")
        || lower.contains("target closed")
        || lower.contains("no such window")
        || lower.contains("browser closed")
        || indicates_unreachable(&lower)
    {
        AutomationError::SessionLost(message)
    } else if lower.contains("no node with given id")
        || lower.contains("could not find node")
        || lower.contains("node is detached")
        || lower.contains("cannot find context")
    {
        AutomationError::StaleElement(message)
    } else if lower.contains("box model") || lower.contains("not visible") {
        AutomationError::NotInteractable(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        AutomationError::Timeout(message)
    } else {
        AutomationError::Driver(message)
    }
}

fn probe_script(xpath: &str, condition: ElementCondition) -> Result<String> {
    Ok(format!(
        r#"
        (function(xp, cond) {{
            let node;
            try {{
                node = document.evaluate(xp, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
            }} catch (e) {{
                return 'invalid:' + e.message;
            }}
            if (!node) return 'absent';
            if (cond === 'presence') return 'ok';
            if (node.nodeType !== 1) return 'hidden';
            const rect = node.getBoundingClientRect();
            const style = window.getComputedStyle(node);
            if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' || style.display === 'none') {{
                return 'hidden';
            }}
            if (cond === 'clickable' && (node.disabled || node.getAttribute('aria-disabled') === 'true')) {{
                return 'disabled';
            }}
            return 'ok';
        }})({}, {})
        "#,
        serde_json::to_string(xpath)?,
        serde_json::to_string(&condition.to_string())?
    ))
}

#[async_trait]
impl BrowserTrait for ChromeBrowser {
    type Element = ChromeElement;

    async fn find_element(
        &self,
        xpath: &str,
        condition: ElementCondition,
    ) -> Result<Option<Self::Element>> {
        let verdict = self.evaluate(&probe_script(xpath, condition)?)?;
        let verdict = verdict.as_str().unwrap_or("absent");

        if let Some(reason) = verdict.strip_prefix("invalid:") {
            return Err(AutomationError::InvalidSelector(format!("{}: {}", xpath, reason)));
        }
        if verdict != "ok" {
            return Ok(None);
        }

        match self.tab()?.find_element_by_xpath(xpath) {
            Ok(element) => Ok(Some(ChromeElement {
                node_id: element.node_id,
                locator: xpath.to_string(),
            })),
            Err(e) => match map_chrome_error(e) {
                fatal @ AutomationError::SessionLost(_) => Err(fatal),
                other => {
                    debug!(xpath, "Node vanished between probe and lookup: {}", other);
                    Ok(None)
                }
            },
        }
    }

    async fn click(&self, element: &Self::Element) -> Result<()> {
        let tab = self.tab()?;
        self.element(tab, element)?
            .click()
            .map_err(map_chrome_error)?;
        Ok(())
    }

    async fn script_click(&self, element: &Self::Element) -> Result<()> {
        let tab = self.tab()?;
        self.element(tab, element)?
            .call_js_fn("function() { this.click(); }", vec![], false)
            .map_err(|e| match map_chrome_error(e) {
                AutomationError::Driver(msg) => AutomationError::JavaScriptFailed(msg),
                other => other,
            })?;
        Ok(())
    }

    async fn scroll_into_view(&self, element: &Self::Element) -> Result<()> {
        let tab = self.tab()?;
        self.element(tab, element)?
            .scroll_into_view()
            .map_err(map_chrome_error)?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.evaluate("window.location.href")?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn body_html(&self) -> Result<String> {
        let value = self.evaluate("document.body ? document.body.innerHTML : ''")?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let tab = self.tab()?;
        tab.navigate_to(url).map_err(map_chrome_error)?;
        tab.wait_until_navigated().map_err(map_chrome_error)?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.browser.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        self.tab = None;
        self.browser = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_connection_maps_to_session_lost() {
        let err = anyhow::anyhow!("Unable to make method calls because underlying connection is closed");
        assert!(matches!(map_chrome_error(err), AutomationError::SessionLost(_)));
    }

    #[test]
    fn test_missing_node_maps_to_stale() {
        let err = anyhow::anyhow!("Method call error -32000: No node with given id found");
        assert!(matches!(map_chrome_error(err), AutomationError::StaleElement(_)));
    }

    #[test]
    fn test_other_errors_stay_driver_errors() {
        let err = anyhow::anyhow!("Method call error -32601: 'Foo.bar' wasn't found");
        assert!(matches!(map_chrome_error(err), AutomationError::Driver(_)));
    }

    #[test]
    fn test_probe_script_quotes_locator() {
        let script = probe_script("//a[@title=\"x\"]", ElementCondition::Clickable).unwrap();
        assert!(script.contains(r#""//a[@title=\"x\"]""#));
        assert!(script.contains(r#""clickable""#));
    }
}
