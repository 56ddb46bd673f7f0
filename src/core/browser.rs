use crate::errors::Result;
use crate::types::ElementCondition;
use async_trait::async_trait;

/// Driver seam between the resilience core and a concrete browser.
///
/// Every method is a single, non-waiting probe or action. Waiting, retrying
/// and fallback logic live above this trait so that any driver gets them for
/// free. Implementations map their native failures onto
/// [`AutomationError`](crate::errors::AutomationError) so that a dead window
/// surfaces as `SessionLost` and a broken expression as `InvalidSelector`.
#[async_trait]
pub trait BrowserTrait: Send + Sync {
    /// Handle to a resolved element. It may go stale when the page re-renders.
    type Element: Send + Sync + Clone;

    /// Look up the first node matching `xpath` and check `condition` once.
    ///
    /// `Ok(None)` means "not there yet" (absent, hidden or disabled).
    async fn find_element(
        &self,
        xpath: &str,
        condition: ElementCondition,
    ) -> Result<Option<Self::Element>>;

    /// Native click through synthesized input events.
    async fn click(&self, element: &Self::Element) -> Result<()>;

    /// Click dispatched from page script, for overlays that swallow input events.
    async fn script_click(&self, element: &Self::Element) -> Result<()>;

    async fn scroll_into_view(&self, element: &Self::Element) -> Result<()>;

    /// Current URL, read from the page so a dead connection is noticed.
    async fn current_url(&self) -> Result<String>;

    /// Serialized markup of the document body.
    async fn body_html(&self) -> Result<String>;

    async fn navigate(&self, url: &str) -> Result<()>;

    /// Whether the driver still holds a browser. `false` after `close`.
    fn is_running(&self) -> bool;

    /// Close the browser
    async fn close(&mut self) -> Result<()>;
}
