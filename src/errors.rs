use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Stale element reference: {0}")]
    StaleElement(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Circuit breaker open for '{0}'")]
    CircuitOpen(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Drift statistics persistence failed: {0}")]
    DriftPersistence(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Anyhow error: {0}")]
    AnyhowError(String),
}

pub type Result<T> = std::result::Result<T, AutomationError>;

// Convert anyhow::Error to AutomationError
impl From<anyhow::Error> for AutomationError {
    fn from(err: anyhow::Error) -> Self {
        AutomationError::AnyhowError(err.to_string())
    }
}

impl AutomationError {
    /// True for errors that mean the browser window or driver connection is gone.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, AutomationError::SessionLost(_))
    }

    /// DOM-level hiccups that a fresh element lookup can cure.
    pub fn is_dom_transient(&self) -> bool {
        matches!(
            self,
            AutomationError::StaleElement(_)
                | AutomationError::Timeout(_)
                | AutomationError::ElementNotFound(_)
                | AutomationError::NotInteractable(_)
        )
    }
}
