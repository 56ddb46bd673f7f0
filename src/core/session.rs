use crate::core::BrowserTrait;
use crate::errors::Result;
use crate::types::{ClickOptions, ElementCondition, PortalState};
use async_trait::async_trait;

/// Operations an automation session offers to the orchestrator.
///
/// Negative outcomes that callers are expected to handle (element missing,
/// login rejected, state unreachable) come back as `Ok(None)` / `Ok(false)`.
/// `Err` is reserved for failures that outlived the retry layer, most
/// importantly a lost browser session.
#[async_trait]
pub trait SessionTrait<B: BrowserTrait>: Send + Sync {
    /// Resolve the locator set registered under `key`.
    async fn find(
        &self,
        key: &str,
        condition: ElementCondition,
        wait_profile: &str,
    ) -> Result<Option<B::Element>>;

    /// Click the element registered under `key` with retries and spinner handling.
    async fn click(&self, key: &str, options: ClickOptions<'_>) -> Result<bool>;

    /// Cheap liveness probe. The string explains a negative answer.
    async fn validate_connection(&self) -> (bool, String);

    /// Whether the portal is showing its login flow. Errs toward `true`.
    async fn is_session_closed(&self) -> bool;

    async fn detect_current_state(&self) -> Result<PortalState>;

    async fn ensure_state(&self, desired: PortalState) -> Result<bool>;

    async fn login(&self, retry: bool) -> Result<bool>;
}
